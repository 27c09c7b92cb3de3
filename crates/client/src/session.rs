// Session Helpers
//
// Thin wrappers over `GatewayClient::request` for the session and chat
// methods. The only state kept is the most recently resolved session key.

use crate::client::{GatewayClient, RequestOptions};
use crate::error::ClientError;
use crate::protocol::ErrorShape;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

pub const DEFAULT_SESSION_LABEL: &str = "main";

/// One row of `sessions.list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SessionKeyPayload {
    key: String,
}

impl GatewayClient {
    /// Resolve the session with `label`, creating it when the gateway does not
    /// know it, and remember its key.
    pub async fn resolve_session(&self, label: &str) -> Result<String, ClientError> {
        let params = json!({ "label": label });
        let payload = match self.request("sessions.resolve", params.clone()).await {
            Ok(payload) => payload,
            Err(e) if e.code() == Some(ErrorShape::NOT_FOUND) => {
                tracing::debug!(label, "session not found, creating it");
                self.request("sessions.create", params).await?
            }
            Err(e) => return Err(e),
        };

        let key = serde_json::from_value::<SessionKeyPayload>(payload)
            .map_err(|e| ClientError::Protocol(format!("session payload without key: {}", e)))?
            .key;
        *self.session_key.write().await = Some(key.clone());
        Ok(key)
    }

    /// Most recently resolved session key
    pub async fn session_key(&self) -> Option<String> {
        self.session_key.read().await.clone()
    }

    /// Send one chat turn and wait for its final result.
    ///
    /// Uses the cached session key, resolving the default session first if
    /// none has been resolved yet.
    pub async fn send_chat(&self, message: &str) -> Result<JsonValue, ClientError> {
        let session_key = self.current_session_key().await?;
        let params = json!({
            "sessionKey": session_key,
            "message": message,
            "idempotencyKey": Uuid::new_v4().to_string(),
        });
        self.request_with("chat.send", params, RequestOptions { expect_final: true })
            .await
    }

    pub async fn chat_history(&self, limit: Option<u32>) -> Result<JsonValue, ClientError> {
        let session_key = self.current_session_key().await?;
        let mut params = json!({ "sessionKey": session_key });
        if let Some(limit) = limit {
            params["limit"] = json!(limit);
        }
        self.request("chat.history", params).await
    }

    pub async fn list_sessions(&self, limit: Option<u32>) -> Result<Vec<SessionSummary>, ClientError> {
        let params = match limit {
            Some(limit) => json!({ "limit": limit }),
            None => json!({}),
        };
        let payload = self.request("sessions.list", params).await?;
        let rows = payload
            .get("sessions")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect())
    }

    async fn current_session_key(&self) -> Result<String, ClientError> {
        if let Some(key) = self.session_key().await {
            return Ok(key);
        }
        self.resolve_session(DEFAULT_SESSION_LABEL).await
    }
}
