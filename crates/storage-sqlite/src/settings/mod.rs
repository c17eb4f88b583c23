//! SQLite-backed settings store.

mod model;
mod repository;

pub use model::AppSettingDB;
pub use repository::SettingsRepository;
