use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde_json::Value;

use bankfeed_core::sync::{RecordSink, SinkRecord};
use bankfeed_core::Result;

use super::model::{NewTsRecordDB, TsRecordDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::ts_records;
use crate::schema::ts_records::dsl::*;

impl TryFrom<TsRecordDB> for SinkRecord {
    type Error = StorageError;

    fn try_from(row: TsRecordDB) -> std::result::Result<Self, Self::Error> {
        let ts = Utc
            .timestamp_millis_opt(row.timestamp)
            .single()
            .ok_or_else(|| {
                StorageError::Corrupt(format!("record {} has timestamp {}", row.id, row.timestamp))
            })?;
        let value = serde_json::from_str(&row.data)
            .map_err(|e| StorageError::Corrupt(format!("record {}: {}", row.id, e)))?;
        Ok(SinkRecord {
            timestamp: ts,
            data: value,
        })
    }
}

/// Append-only time-series table. Each append is stamped with the write time.
pub struct SeriesRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SeriesRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        SeriesRepository { pool, writer }
    }

    /// All records of `series` in append order.
    #[cfg(test)]
    pub(crate) fn load_series(&self, series: &str) -> Result<Vec<SinkRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = ts_records
            .filter(series_id.eq(series))
            .order(id.asc())
            .select(TsRecordDB::as_select())
            .load::<TsRecordDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter()
            .map(|row| SinkRecord::try_from(row).map_err(Into::into))
            .collect()
    }

    fn latest_impl(&self, series: &str) -> Result<Option<SinkRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let row = ts_records
            .filter(series_id.eq(series))
            .order((timestamp.desc(), id.desc()))
            .select(TsRecordDB::as_select())
            .first::<TsRecordDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(SinkRecord::try_from).transpose()?)
    }
}

#[async_trait]
impl RecordSink for SeriesRepository {
    async fn append(&self, series: &str, record: Value) -> Result<()> {
        let row = NewTsRecordDB {
            series_id: series.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            data: serde_json::to_string(&record)?,
        };
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(ts_records::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn latest(&self, series: &str) -> Result<Option<SinkRecord>> {
        self.latest_impl(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use serde_json::json;
    use tempfile::tempdir;

    fn setup_repo() -> (tempfile::TempDir, SeriesRepository) {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(pool.as_ref().clone());
        (dir, SeriesRepository::new(pool, writer))
    }

    #[tokio::test]
    async fn empty_series_has_no_latest() {
        let (_dir, repo) = setup_repo();
        assert!(repo.latest("truelayerUserTransactions").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_is_last_appended_within_series() {
        let (_dir, repo) = setup_repo();
        repo.append("txns", json!({"transaction_id": "T1"}))
            .await
            .unwrap();
        repo.append("txns", json!({"transaction_id": "T2"}))
            .await
            .unwrap();
        repo.append("balance", json!({"current": 1.0}))
            .await
            .unwrap();

        let latest = repo.latest("txns").await.unwrap().unwrap();
        assert_eq!(latest.data["transaction_id"], "T2");

        let all = repo.load_series("txns").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].data["transaction_id"], "T1");
        assert!(all[0].timestamp <= all[1].timestamp);
    }

    #[tokio::test]
    async fn appends_are_never_deduplicated() {
        let (_dir, repo) = setup_repo();
        for _ in 0..3 {
            repo.append("balance", json!({"current": 42.0}))
                .await
                .unwrap();
        }
        assert_eq!(repo.load_series("balance").unwrap().len(), 3);
    }
}
