//! User preferences the merge engine reads and appends to, but does not own.
//!
//! The application decides where preferences live; the engine only needs a key-value
//! view. [`StorePreferences`] keeps them in the store's `settings` database,
//! [`MemoryPreferences`] keeps them in memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use serde_json::Value as JsonValue;

use crate::app_response::AppResponse;
use crate::local_db_state::LocalStore;

pub const SONG_SEARCH_SELECTED_BUNDLES: &str = "songSearchSelectedBundlesUuids";
pub const SONG_STRING_SEARCH_SELECTED_BUNDLES: &str = "songStringSearchSelectedBundlesUuids";
pub const DOCUMENT_SEARCH_SELECTED_GROUPS: &str = "documentSearchSelectedGroupsUuids";
pub const AUTO_UPDATE_CHECK_INTERVAL_DAYS: &str = "autoUpdateDatabasesCheckIntervalInDays";
pub const AUTO_UPDATE_LAST_CHECK_TIMESTAMP: &str = "autoUpdateDatabasesLastCheckTimestamp";

pub trait Preferences: Send + Sync {
    fn get(&self, key: &str) -> Option<JsonValue>;

    fn set(&self, key: &str, value: JsonValue) -> Result<(), AppResponse>;

    fn uuid_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn set_uuid_list(&self, key: &str, uuids: Vec<String>) -> Result<(), AppResponse> {
        self.set(key, JsonValue::from(uuids))
    }

    fn contains_uuid(&self, key: &str, uuid: &str) -> bool {
        self.uuid_list(key).iter().any(|it| it == uuid)
    }

    /// Appends `uuid` to the list unless it is already there.
    fn add_uuid(&self, key: &str, uuid: &str) -> Result<(), AppResponse> {
        let mut uuids = self.uuid_list(key);
        if uuids.iter().any(|it| it == uuid) {
            return Ok(());
        }
        uuids.push(uuid.to_string());
        self.set_uuid_list(key, uuids)
    }

    fn remove_uuid(&self, key: &str, uuid: &str) -> Result<(), AppResponse> {
        let uuids: Vec<String> = self
            .uuid_list(key)
            .into_iter()
            .filter(|it| it != uuid)
            .collect();
        self.set_uuid_list(key, uuids)
    }

    /// Interval override set by the user, falling back to `default_days`.
    fn check_interval_days(&self, default_days: i64) -> i64 {
        self.get(AUTO_UPDATE_CHECK_INTERVAL_DAYS)
            .and_then(|value| value.as_i64())
            .unwrap_or(default_days)
    }

    fn last_update_check(&self) -> Option<DateTime<Utc>> {
        let millis = self.get(AUTO_UPDATE_LAST_CHECK_TIMESTAMP)?.as_i64()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    fn set_last_update_check(&self, at: DateTime<Utc>) -> Result<(), AppResponse> {
        self.set(
            AUTO_UPDATE_LAST_CHECK_TIMESTAMP,
            JsonValue::from(at.timestamp_millis()),
        )
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get(&self, key: &str) -> Option<JsonValue> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<(), AppResponse> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| AppResponse::DatabaseError("Preferences lock poisoned".to_string()))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Preferences persisted in the local store's `settings` database.
pub struct StorePreferences {
    store: Arc<LocalStore>,
}

impl StorePreferences {
    pub fn new(store: Arc<LocalStore>) -> Self {
        StorePreferences { store }
    }
}

impl Preferences for StorePreferences {
    fn get(&self, key: &str) -> Option<JsonValue> {
        match self.store.get_setting(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not read setting {key}: {e}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<(), AppResponse> {
        self.store.put_setting(key, &value)
    }
}
