// Device Authentication
//
// Builds the string a device signs during the `connect` handshake and decides
// which credential the handshake presents.
//
// Payload layout (pipe-joined):
//   v1|deviceId|clientId|clientMode|role|scopesCsv|signedAtMs|token
//   v2|deviceId|clientId|clientMode|role|scopesCsv|signedAtMs|token|nonce
//
// v2 is used exactly when the gateway supplied a nonce. The gateway rebuilds
// the same string from the connect params, so both forms must stay byte-stable.

use crate::tokens::DeviceTokenEntry;

/// Inputs to the signed device auth payload
#[derive(Debug, Clone)]
pub struct DeviceAuthPayload<'a> {
    pub device_id: &'a str,
    pub client_id: &'a str,
    pub client_mode: &'a str,
    pub role: &'a str,
    /// Must already be normalized; see [`normalize_scopes`]
    pub scopes: &'a [String],
    pub signed_at_ms: i64,
    pub token: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

impl DeviceAuthPayload<'_> {
    pub fn version(&self) -> &'static str {
        if self.nonce.is_some() {
            "v2"
        } else {
            "v1"
        }
    }

    pub fn build(&self) -> String {
        let signed_at = self.signed_at_ms.to_string();
        let scopes = self.scopes.join(",");
        let mut parts = vec![
            self.version(),
            self.device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or_default(),
        ];
        if let Some(nonce) = self.nonce {
            parts.push(nonce);
        }
        parts.join("|")
    }
}

pub fn normalize_role(role: &str) -> String {
    role.trim().to_string()
}

/// Trim, drop empties, sort and de-duplicate.
pub fn normalize_scopes<S: AsRef<str>>(scopes: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = scopes
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Credential chosen for one handshake attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthSelection {
    pub token: Option<String>,
    /// The stored device token was used while a shared token was also
    /// available; an authentication failure should drop the stored one so the
    /// next attempt falls back to the shared credential.
    pub clear_stored_on_failure: bool,
}

/// A stored device token for the role outranks a caller-supplied shared token.
pub fn select_auth_token(stored: Option<&DeviceTokenEntry>, shared: Option<&str>) -> AuthSelection {
    let shared = shared.filter(|t| !t.trim().is_empty());
    match stored {
        Some(entry) => AuthSelection {
            token: Some(entry.token.clone()),
            clear_stored_on_failure: shared.is_some(),
        },
        None => AuthSelection {
            token: shared.map(str::to_string),
            clear_stored_on_failure: false,
        },
    }
}
