// Device Identity Management
//
// Each installation owns one ed25519 keypair. The device id is the hex SHA-256
// of the raw 32-byte public key; it is re-derived from the key on every load
// and a stored id that disagrees is rewritten, never trusted.

use crate::error::IdentityError;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

const IDENTITY_VERSION: u32 = 1;

/// On-disk identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIdentity {
    version: u32,
    device_id: String,
    public_key_pem: String,
    private_key_pem: String,
    created_at_ms: i64,
}

/// Device identity: keypair plus the id derived from it
#[derive(Clone)]
pub struct DeviceIdentity {
    device_id: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    /// Load the identity stored at `path`, creating and persisting a fresh
    /// keypair when no record exists yet.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            return Self::load(path);
        }

        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let identity = Self::from_signing_key(SigningKey::from_bytes(&secret));

        let record = identity.to_record(chrono::Utc::now().timestamp_millis())?;
        write_private_file(path, &serde_json::to_string_pretty(&record)?)?;
        tracing::info!(device_id = %identity.device_id, "created device identity");
        Ok(identity)
    }

    fn load(path: &Path) -> Result<Self, IdentityError> {
        let raw = fs::read_to_string(path)?;
        let stored: StoredIdentity = serde_json::from_str(&raw)?;
        if stored.version != IDENTITY_VERSION {
            return Err(IdentityError::Storage(format!(
                "unsupported identity version {}",
                stored.version
            )));
        }

        let signing_key = SigningKey::from_pkcs8_pem(&stored.private_key_pem)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        let public_raw = public_key_raw_from_pem(&stored.public_key_pem)?;
        if signing_key.verifying_key().to_bytes() != public_raw {
            return Err(IdentityError::Storage(
                "stored public key does not belong to the stored private key".to_string(),
            ));
        }

        let identity = Self::from_signing_key(signing_key);
        if identity.device_id != stored.device_id {
            tracing::warn!(
                stored = %stored.device_id,
                derived = %identity.device_id,
                "device id drifted from public key, rewriting identity record"
            );
            let record = identity.to_record(stored.created_at_ms)?;
            write_private_file(path, &serde_json::to_string_pretty(&record)?)?;
        }
        Ok(identity)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let device_id = device_id_for(&signing_key.verifying_key().to_bytes());
        Self {
            device_id,
            signing_key,
        }
    }

    fn to_record(&self, created_at_ms: i64) -> Result<StoredIdentity, IdentityError> {
        let private_key_pem = self
            .signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        let public_key_pem = self
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| IdentityError::Key(e.to_string()))?;

        Ok(StoredIdentity {
            version: IDENTITY_VERSION,
            device_id: self.device_id.clone(),
            public_key_pem,
            private_key_pem: private_key_pem.as_str().to_owned(),
            created_at_ms,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Raw public key as base64url, the form sent on the wire
    pub fn public_key_base64url(&self) -> String {
        base64_url_encode(&self.verifying_key().to_bytes())
    }

    /// Sign `payload` and return the signature as base64url.
    ///
    /// Ed25519 signing is deterministic: the same payload always yields the
    /// same signature.
    pub fn sign(&self, payload: &str) -> String {
        let signature = self.signing_key.sign(payload.as_bytes());
        base64_url_encode(&signature.to_bytes())
    }
}

/// Hex-encoded SHA-256 of the raw public key bytes
pub fn device_id_for(public_key_raw: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key_raw))
}

/// Strip the SPKI/PEM envelope and return the 32 raw key bytes.
pub fn public_key_raw_from_pem(pem: &str) -> Result<[u8; 32], IdentityError> {
    let key =
        VerifyingKey::from_public_key_pem(pem).map_err(|e| IdentityError::Key(e.to_string()))?;
    Ok(key.to_bytes())
}

/// Check a base64url signature against a base64url raw public key.
pub fn verify_signature(public_key: &str, payload: &str, signature: &str) -> bool {
    let Ok(public_raw) = base64_url_decode(public_key) else {
        return false;
    };
    let Ok(signature_raw) = base64_url_decode(signature) else {
        return false;
    };
    let Ok(public_bytes) = <[u8; 32]>::try_from(public_raw.as_slice()) else {
        return false;
    };
    let Ok(signature_bytes) = <[u8; 64]>::try_from(signature_raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&public_bytes) else {
        return false;
    };
    key.verify(payload.as_bytes(), &Signature::from_bytes(&signature_bytes))
        .is_ok()
}

/// Base64URL encode without padding
pub fn base64_url_encode(data: &[u8]) -> String {
    use base64::prelude::*;
    BASE64_URL_SAFE_NO_PAD.encode(data)
}

/// Base64URL decode, tolerating padding
pub fn base64_url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::prelude::*;
    BASE64_URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))
}

/// Whole-file write readable only by the owner.
pub(crate) fn write_private_file(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
