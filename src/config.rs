//! Runtime configuration for the merge engine.
//!
//! Every field has a default so an embedding application can pass `{}` (or nothing at
//! all over FFI) and only override what it cares about.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;
use crate::update_detector::UpdatePolicy;

/// Name the server gives to the melody every song starts out with.
pub const DEFAULT_MELODY_NAME: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Melody name that marks a selection as "the default", which is never migrated.
    pub default_melody_name: String,
    /// Days between automatic update checks. Zero or negative disables auto sync.
    pub check_interval_days: i64,
    pub update_policy: UpdatePolicy,
    /// LMDB map size in megabytes.
    pub map_size_mb: usize,
    pub connection_timeout_ms: u64,
    pub connection_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            default_melody_name: DEFAULT_MELODY_NAME.to_string(),
            check_interval_days: 3,
            update_policy: UpdatePolicy::ContentHash,
            map_size_mb: 256,
            connection_timeout_ms: 3000,
            connection_poll_ms: 50,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, AppResponse> {
        if json.trim().is_empty() {
            return Ok(SyncConfig::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppResponse> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppResponse::BadRequest(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    pub fn map_size_bytes(&self) -> usize {
        self.map_size_mb.max(1) * 1024 * 1024
    }
}
