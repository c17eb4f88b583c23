//! Core synchronization engine for the bank feed agent.
//!
//! The engine keeps one OAuth session alive and incrementally ingests balance
//! snapshots and transactions for a single monitored account. Everything that
//! talks to the outside world (provider API, settings store, record sink) is
//! reached through the traits in [`sync::traits`].

pub mod errors;
pub mod sync;

pub use errors::{Error, Result};
