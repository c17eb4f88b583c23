//! SQLite storage for the bank-feed agent: the settings store and the record
//! sink, both behind a single-writer connection.

pub mod db;
pub mod errors;
pub mod schema;
pub mod series;
pub mod settings;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, WriteHandle};
pub use errors::StorageError;
pub use series::SeriesRepository;
pub use settings::SettingsRepository;
