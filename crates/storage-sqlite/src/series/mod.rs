//! SQLite-backed time-series sink.

mod model;
mod repository;

pub use model::{NewTsRecordDB, TsRecordDB};
pub use repository::SeriesRepository;
