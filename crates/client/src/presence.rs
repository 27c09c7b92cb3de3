// Presence Tracking
//
// Mirror of the gateway's presence list. Seeded from the hello-ok snapshot and
// replaced wholesale by each `presence` event. Events tagged with an older
// presence version than the one already applied are dropped.

use crate::protocol::{EventFrame, PresenceEntry};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct PresenceState {
    entries: Vec<PresenceEntry>,
    version: Option<u64>,
}

/// Shared presence cache
#[derive(Debug, Clone, Default)]
pub struct PresenceCache {
    state: Arc<RwLock<PresenceState>>,
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `snapshot.presence` and `snapshot.stateVersion.presence` from a
    /// hello-ok snapshot.
    pub async fn seed(&self, snapshot: &JsonValue) {
        let entries = parse_entries(snapshot.get("presence"));
        let version = snapshot
            .get("stateVersion")
            .and_then(|v| v.get("presence"))
            .and_then(JsonValue::as_u64);

        let mut state = self.state.write().await;
        state.entries = entries.unwrap_or_default();
        state.version = version;
    }

    /// Apply a `presence` event. Returns false when the event was stale.
    pub async fn apply_event(&self, event: &EventFrame) -> bool {
        let version = event.state_version.as_ref().and_then(|v| v.presence);
        let payload = event.payload.as_ref();
        let list = payload.and_then(|p| p.get("presence")).or(payload);
        let Some(entries) = parse_entries(list) else {
            tracing::debug!("presence event without a presence list");
            return false;
        };

        let mut state = self.state.write().await;
        if let (Some(incoming), Some(current)) = (version, state.version) {
            if incoming < current {
                tracing::debug!(incoming, current, "ignoring stale presence update");
                return false;
            }
        }
        state.entries = entries;
        if version.is_some() {
            state.version = version;
        }
        true
    }

    pub async fn entries(&self) -> Vec<PresenceEntry> {
        self.state.read().await.entries.clone()
    }

    pub async fn state_version(&self) -> Option<u64> {
        self.state.read().await.version
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.version = None;
    }
}

fn parse_entries(value: Option<&JsonValue>) -> Option<Vec<PresenceEntry>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
    )
}
