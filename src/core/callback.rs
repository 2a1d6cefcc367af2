//! Best-effort asynchronous HTTP notification to the originating application.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::session::Session;
use crate::core::tenant::Tenant;

/// Events the dispatcher can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackEvent {
    SessionCreated,
    DocumentOpened,
    DocumentSaved,
    LockAcquired,
    LockReleased,
    SessionExpired,
}

impl CallbackEvent {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::DocumentOpened => "document_opened",
            Self::DocumentSaved => "document_saved",
            Self::LockAcquired => "lock_acquired",
            Self::LockReleased => "lock_released",
            Self::SessionExpired => "session_expired",
        }
    }
}

/// A queued callback delivery attempt.
#[derive(Debug, Clone)]
struct QueuedCallback {
    url: String,
    auth: Option<String>,
    payload: Value,
    attempt: u32,
}

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Dispatches WOPI lifecycle events to tenant callback URLs. Failures are
/// logged and handed to a retry queue with exponential backoff rather than
/// held against the calling WOPI request.
pub struct CallbackDispatcher {
    client: reqwest::Client,
    retry_tx: mpsc::UnboundedSender<QueuedCallback>,
}

impl CallbackDispatcher {
    /// Spawn the dispatcher along with its background retry worker.
    #[must_use]
    pub fn spawn() -> Arc<Self> {
        let client = reqwest::Client::new();
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<QueuedCallback>();

        let worker_client = client.clone();
        let requeue_tx = retry_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = retry_rx.recv().await {
                let worker_client = worker_client.clone();
                let requeue_tx = requeue_tx.clone();
                tokio::spawn(async move {
                    retry_one(&worker_client, item, &requeue_tx).await;
                });
            }
        });

        Arc::new(Self { client, retry_tx })
    }

    /// Build the payload template and best-effort POST it. Callbacks whose
    /// tenant lacks a callback URL, or whose session lacks
    /// `origin_connection_id`, are silently skipped.
    pub async fn dispatch(&self, tenant: &Tenant, session: &Session, event: CallbackEvent, extras: Value) {
        let Some(base_url) = tenant.callback_base_url.as_deref() else {
            return;
        };
        if session.origin_connection_id.is_none() {
            return;
        }

        let mut payload = json!({
            "origin_connection_id": session.origin_connection_id,
            "origin_page_id": session.origin_page_id,
            "event": event.name(),
            "session_id": session.id,
            "file_path": session.file_path,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let (Value::Object(ref mut base), Value::Object(extra)) = (&mut payload, extras) {
            base.extend(extra);
        }

        let url = format!("{base_url}/wopi/callback");
        self.post_once(&url, tenant.callback_auth.clone(), payload).await;
    }

    async fn post_once(&self, url: &str, auth: Option<String>, payload: Value) {
        let mut request = self.client.post(url).json(&payload);
        if let Some(auth) = &auth {
            request = request.bearer_auth(auth);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                tracing::warn!(url, status = %resp.status(), "callback delivery failed, queuing retry");
                self.queue_retry(url.to_string(), auth, payload, 1);
            }
            Err(error) => {
                tracing::warn!(url, %error, "callback delivery failed, queuing retry");
                self.queue_retry(url.to_string(), auth, payload, 1);
            }
        }
    }

    fn queue_retry(&self, url: String, auth: Option<String>, payload: Value, attempt: u32) {
        if attempt > MAX_ATTEMPTS {
            tracing::warn!(url, attempt, "callback dropped after exhausting retries");
            return;
        }
        let _ = self.retry_tx.send(QueuedCallback { url, auth, payload, attempt });
    }
}

async fn retry_one(
    client: &reqwest::Client,
    item: QueuedCallback,
    requeue_tx: &mpsc::UnboundedSender<QueuedCallback>,
) {
    let backoff = (BASE_BACKOFF * 2u32.saturating_pow(item.attempt.saturating_sub(1)))
        .min(MAX_BACKOFF);
    tokio::time::sleep(backoff).await;

    let mut request = client.post(&item.url).json(&item.payload);
    if let Some(auth) = &item.auth {
        request = request.bearer_auth(auth);
    }

    match request.send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::debug!(url = %item.url, attempt = item.attempt, "callback retry succeeded");
        }
        _ if item.attempt >= MAX_ATTEMPTS => {
            tracing::warn!(url = %item.url, "callback dropped after exhausting retries");
        }
        _ => {
            tracing::warn!(url = %item.url, attempt = item.attempt, "callback retry failed, requeuing");
            let _ = requeue_tx.send(QueuedCallback { attempt: item.attempt + 1, ..item });
        }
    }
}

/// A stable identifier derived from a session, for logging correlation.
#[must_use]
pub fn correlation_id(session: &Session) -> Uuid {
    session.id
}
