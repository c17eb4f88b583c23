//! Typed access to the settings blob.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use super::sync_model::{DriverSettings, SETTINGS_KEY};
use super::traits::SettingsStore;
use crate::errors::Result;

/// Loads and saves [`DriverSettings`] through a [`SettingsStore`], falling
/// back to process-level defaults when nothing has been stored yet.
#[derive(Clone)]
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    defaults: DriverSettings,
}

impl SettingsService {
    pub fn new(store: Arc<dyn SettingsStore>, defaults: DriverSettings) -> Self {
        Self { store, defaults }
    }

    pub async fn load(&self) -> Result<DriverSettings> {
        match self.store.read(SETTINGS_KEY).await? {
            None | Some(Value::Null) => {
                debug!("[Settings] No stored settings, using defaults");
                Ok(self.defaults.clone())
            }
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    pub async fn save(&self, settings: &DriverSettings) -> Result<()> {
        let value = serde_json::to_value(settings)?;
        self.store.write(SETTINGS_KEY, value).await
    }
}
