use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::SqliteConnection;
use serde_json::Value;

use bankfeed_core::sync::SettingsStore;
use bankfeed_core::Result;

use super::model::AppSettingDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::app_settings;
use crate::schema::app_settings::dsl::*;

/// Key-value settings table. Each value is one JSON document.
pub struct SettingsRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SettingsRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        SettingsRepository { pool, writer }
    }

    fn read_impl(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = get_connection(&self.pool)?;
        let raw = app_settings
            .filter(setting_key.eq(key))
            .select(setting_value)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SettingsStore for SettingsRepository {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        self.read_impl(key)
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        let row = AppSettingDB {
            setting_key: key.to_string(),
            setting_value: serde_json::to_string(&value)?,
            updated_at: Utc::now().to_rfc3339(),
        };
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(app_settings::table)
                    .values(&row)
                    .on_conflict(setting_key)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use serde_json::json;
    use tempfile::tempdir;

    fn setup_repo() -> (tempfile::TempDir, SettingsRepository) {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init db");
        run_migrations(&db_path).expect("migrate db");
        let pool = create_pool(&db_path).expect("create pool");
        let writer = spawn_writer(pool.as_ref().clone());
        (dir, SettingsRepository::new(pool, writer))
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let (_dir, repo) = setup_repo();
        assert_eq!(repo.read("settings").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_then_overwrite_keeps_latest_blob() {
        let (_dir, repo) = setup_repo();

        repo.write("settings", json!({"client_id": "a"}))
            .await
            .unwrap();
        repo.write(
            "settings",
            json!({"client_id": "b", "tokens": {"access_token": "x", "refresh_token": "y"}}),
        )
        .await
        .unwrap();

        let stored = repo.read("settings").await.unwrap().unwrap();
        assert_eq!(stored["client_id"], "b");
        assert_eq!(stored["tokens"]["refresh_token"], "y");
    }
}
