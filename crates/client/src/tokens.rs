// Device Token Store
//
// Role-scoped tokens issued by the gateway, persisted in one JSON file owned by
// a single device id. Reads never fail: anything unreadable is "no token".

use crate::auth::{normalize_role, normalize_scopes};
use crate::error::TokenStoreError;
use crate::identity::write_private_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TOKEN_STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenEntry {
    pub token: String,
    pub role: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTokens {
    version: u32,
    device_id: String,
    #[serde(default)]
    tokens: BTreeMap<String, DeviceTokenEntry>,
}

/// File-backed token table
#[derive(Debug, Clone)]
pub struct DeviceTokenStore {
    path: PathBuf,
}

impl DeviceTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token for `(device_id, role)`, or `None` when the file is missing,
    /// malformed, or owned by another device.
    pub fn load(&self, device_id: &str, role: &str) -> Option<DeviceTokenEntry> {
        let stored = self.read_for(device_id)?;
        stored.tokens.get(&normalize_role(role)).cloned()
    }

    /// Persist a token for `(device_id, role)` and return the stored entry.
    ///
    /// Entries for other roles survive only if the file already belongs to
    /// `device_id`; otherwise the table starts empty.
    pub fn store(
        &self,
        device_id: &str,
        role: &str,
        token: &str,
        scopes: &[String],
    ) -> Result<DeviceTokenEntry, TokenStoreError> {
        let role = normalize_role(role);
        let mut stored = self.read_for(device_id).unwrap_or_else(|| StoredTokens {
            version: TOKEN_STORE_VERSION,
            device_id: device_id.to_string(),
            tokens: BTreeMap::new(),
        });

        let entry = DeviceTokenEntry {
            token: token.to_string(),
            role: role.clone(),
            scopes: normalize_scopes(scopes),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        stored.tokens.insert(role, entry.clone());
        self.write(&stored)?;

        tracing::debug!(device_id, role = %entry.role, "stored device token");
        Ok(entry)
    }

    /// Remove the token for `(device_id, role)`. A file owned by another
    /// device is left alone.
    pub fn clear(&self, device_id: &str, role: &str) -> Result<(), TokenStoreError> {
        let Some(mut stored) = self.read_for(device_id) else {
            return Ok(());
        };
        let role = normalize_role(role);
        if stored.tokens.remove(&role).is_some() {
            self.write(&stored)?;
            tracing::info!(device_id, role = %role, "cleared device token");
        }
        Ok(())
    }

    fn read_for(&self, device_id: &str) -> Option<StoredTokens> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let stored: StoredTokens = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable token store: {}", e);
                return None;
            }
        };
        if stored.version != TOKEN_STORE_VERSION || stored.device_id != device_id {
            return None;
        }
        Some(stored)
    }

    fn write(&self, stored: &StoredTokens) -> Result<(), TokenStoreError> {
        let json = serde_json::to_string_pretty(stored)?;
        write_private_file(&self.path, &json)?;
        Ok(())
    }
}
