//! Service configuration: a TOML file with environment-variable overrides.
//! Per-tenant and per-storage records live in the database and are managed
//! through the tenant/storage registries, not this file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".wopi-proxy/db.sqlite")
}

fn default_request_deadline_secs() -> u64 {
    30
}

fn default_session_ttl_secs() -> i64 {
    3600
}

fn default_lock_ttl_secs() -> i64 {
    1800
}

fn default_tenant_cache_ttl_secs() -> u64 {
    60
}

fn default_proxy_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_discovery_action_path() -> String {
    "/browser/discovery/cool.html".to_string()
}

/// Top-level service configuration, loaded once at `serve` startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Secret used to sign/verify access tokens. Must be set explicitly in
    /// production; the default is only suitable for local development.
    #[serde(default = "default_secret")]
    pub token_secret: String,

    /// Base URL this proxy is reachable at, used to compose `WOPISrc`.
    #[serde(default = "default_proxy_base_url")]
    pub proxy_base_url: String,

    /// Discovery action path appended to a pool-mode editor's base URL.
    #[serde(default = "default_discovery_action_path")]
    pub discovery_action_path: String,

    /// Editor base URL used when a tenant's `editor_mode` is `pool`.
    pub pool_editor_url: Option<String>,

    /// Default session/access-token TTL in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,

    /// Lock TTL for LOCK/REFRESH_LOCK, in seconds.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: i64,

    /// Hard per-request deadline in seconds.
    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,

    /// TTL for the in-process tenant/storage registry cache.
    #[serde(default = "default_tenant_cache_ttl_secs")]
    pub tenant_cache_ttl_secs: u64,
}

fn default_secret() -> String {
    "development-only-insecure-secret".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            token_secret: default_secret(),
            proxy_base_url: default_proxy_base_url(),
            discovery_action_path: default_discovery_action_path(),
            pool_editor_url: None,
            session_ttl_secs: default_session_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            request_deadline_secs: default_request_deadline_secs(),
            tenant_cache_ttl_secs: default_tenant_cache_ttl_secs(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path` (TOML), falling back to defaults for
    /// any field the file omits, then apply `WOPI_PROXY_*` environment
    /// variable overrides for the handful of fields operators most commonly
    /// need to change per-deployment.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Self::default()
        };

        if let Ok(addr) = std::env::var("WOPI_PROXY_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(secret) = std::env::var("WOPI_PROXY_TOKEN_SECRET") {
            config.token_secret = secret;
        }
        if let Ok(db) = std::env::var("WOPI_PROXY_DATABASE_PATH") {
            config.database_path = PathBuf::from(db);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = ServiceConfig::default();
        assert!(config.session_ttl_secs > 0);
        assert!(config.lock_ttl_secs > 0);
    }

    #[test]
    fn load_falls_back_to_defaults_for_missing_file() {
        let config = ServiceConfig::load(Path::new("/nonexistent/wopi-proxy.toml")).unwrap();
        assert_eq!(config.bind_addr, default_bind_addr());
    }
}
