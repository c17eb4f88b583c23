//! Sync domain models and services.

mod balance_sync;
mod readiness;
mod settings;
mod sync_engine;
mod sync_model;
mod sync_scheduler;
mod token_manager;
mod transaction_reconciler;
pub mod traits;

pub use balance_sync::*;
pub use readiness::*;
pub use settings::*;
pub use sync_engine::*;
pub use sync_model::*;
pub use sync_scheduler::*;
pub use token_manager::*;
pub use transaction_reconciler::*;
pub use traits::*;
