//! Append-only audit log.
//!
//! Writes sit on the request's hot path but must not fail it: a write
//! failure degrades to log-and-continue rather than surfacing to the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per observable session/WOPI operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub tenant_id: Uuid,
    pub account: String,
    pub user: Option<String>,
    pub command: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(tenant_id: Uuid, account: &str, user: Option<&str>, command: &str, details: impl Into<String>) -> Self {
        Self {
            tenant_id,
            account: account.to_string(),
            user: user.map(str::to_string),
            command: command.to_string(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()>;

    async fn list_for_tenant(&self, tenant_id: Uuid, limit: i64) -> anyhow::Result<Vec<AuditEntry>>;
}

/// Write an audit entry, logging and swallowing any failure rather than
/// propagating it to the caller.
pub async fn record(log: &dyn AuditLog, entry: AuditEntry) {
    let command = entry.command.clone();
    if let Err(error) = log.append(entry).await {
        tracing::warn!(command = %command, %error, "audit log write failed");
    }
}
