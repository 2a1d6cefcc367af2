use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// How a tenant's editor is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorMode {
    /// Use the process-wide configured pool editor URL.
    Pool,
    /// Use the tenant's own `editor_url`.
    Own,
    /// The editor is disabled for this tenant.
    Disabled,
}

/// Per-tenant configuration: editor mode, editor URL, callback target, auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub editor_mode: EditorMode,
    pub editor_url: Option<String>,
    pub callback_base_url: Option<String>,
    pub callback_auth: Option<String>,
    /// Hash of the management-API bearer token; never the plaintext.
    pub api_token_hash: String,
    pub allow_edit: bool,
}

impl Tenant {
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.callback_base_url.is_some()
    }
}

/// Hash a plaintext tenant API token the same way on issue and on verify.
#[must_use]
pub fn hash_api_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_not_plaintext() {
        let hash = hash_api_token("super-secret");
        assert_eq!(hash, hash_api_token("super-secret"));
        assert_ne!(hash, "super-secret");
    }
}
