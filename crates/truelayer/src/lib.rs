//! TrueLayer adapter for the bank-feed sync engine.
//!
//! Implements [`bankfeed_core::sync::UpstreamApi`] over the provider's OAuth
//! and Data APIs.

pub mod client;
pub mod error;
pub mod types;

pub use client::{TrueLayerClient, DEFAULT_API_URL, DEFAULT_AUTH_URL};
pub use error::{ApiRetryClass, Result, TrueLayerError};
