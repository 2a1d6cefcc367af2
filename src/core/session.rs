use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A permission grantable to a WOPI session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

/// A set of permissions. `View` is always present once the set is non-empty;
/// callers should go through [`Permissions::normalize`] rather than
/// constructing this directly from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Permissions(BTreeSet<Permission>);

impl Permissions {
    /// Build a normalized permission set: `view` is injected unconditionally,
    /// `edit` is kept only if both requested and allowed by the tenant.
    #[must_use]
    pub fn normalize(requested_edit: bool, tenant_allows_edit: bool) -> Self {
        let mut set = BTreeSet::new();
        set.insert(Permission::View);
        if requested_edit && tenant_allows_edit {
            set.insert(Permission::Edit);
        }
        Self(set)
    }

    #[must_use]
    pub fn can_edit(&self) -> bool {
        self.0.contains(&Permission::Edit)
    }

    #[must_use]
    pub fn can_view(&self) -> bool {
        self.0.contains(&Permission::View)
    }
}

/// The lock sub-state of a session: `Unlocked` or `Locked(lock_id, expiry)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { lock_id: String, expires_at: DateTime<Utc> },
}

impl LockState {
    /// A lock that has expired is treated as no lock.
    #[must_use]
    pub fn effective(&self, now: DateTime<Utc>) -> Self {
        match self {
            Self::Locked { expires_at, .. } if *expires_at <= now => Self::Unlocked,
            other => other.clone(),
        }
    }

    #[must_use]
    pub fn current_lock_id(&self) -> Option<&str> {
        match self {
            Self::Unlocked => None,
            Self::Locked { lock_id, .. } => Some(lock_id.as_str()),
        }
    }
}

/// Default lock TTL for LOCK / REFRESH_LOCK.
pub const LOCK_TTL: Duration = Duration::minutes(30);

/// Default access-token / session TTL.
pub const DEFAULT_SESSION_TTL: Duration = Duration::seconds(3600);

/// An authenticated, ephemeral handle tying an opaque `file_id` to a tenant,
/// a storage-resolved path, a user identity, a permission set, an expiry,
/// and a WOPI lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub storage_name: String,
    pub file_path: String,
    pub file_id: Uuid,
    pub access_token: String,
    pub permissions: Permissions,
    pub account: String,
    pub user: Option<String>,
    pub origin_connection_id: Option<String>,
    pub origin_page_id: Option<String>,
    pub lock_id: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Set by the store the first time `GetFile` is served for this session.
    /// Tracked independently of `last_accessed_at`, which `CheckFileInfo`
    /// also advances.
    pub document_opened: bool,
}

/// Fields required to construct a brand-new [`Session`] row.
pub struct NewSession {
    pub tenant_id: Uuid,
    pub storage_name: String,
    pub file_path: String,
    pub permissions: Permissions,
    pub account: String,
    pub user: Option<String>,
    pub origin_connection_id: Option<String>,
    pub origin_page_id: Option<String>,
    pub ttl: Duration,
}

impl Session {
    /// Construct a new session with fresh, distinct `id` and `file_id`.
    ///
    /// `session.id` and `file_id` are intentionally two distinct UUIDs:
    /// collapsing them would leak the internal session id into editor URLs.
    #[must_use]
    pub fn new(new: NewSession, access_token: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            storage_name: new.storage_name,
            file_path: new.file_path,
            file_id: Uuid::new_v4(),
            access_token,
            permissions: new.permissions,
            account: new.account,
            user: new.user,
            origin_connection_id: new.origin_connection_id,
            origin_page_id: new.origin_page_id,
            lock_id: None,
            lock_expires_at: None,
            created_at: now,
            expires_at: now + new.ttl,
            last_accessed_at: now,
            document_opened: false,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn lock_state(&self) -> LockState {
        match (&self.lock_id, self.lock_expires_at) {
            (Some(lock_id), Some(expires_at)) => LockState::Locked {
                lock_id: lock_id.clone(),
                expires_at,
            },
            _ => LockState::Unlocked,
        }
    }

    /// The name shown in the editor: `user` if present, otherwise `account`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_always_includes_view() {
        let perms = Permissions::normalize(false, false);
        assert!(perms.can_view());
        assert!(!perms.can_edit());
    }

    #[test]
    fn normalize_drops_edit_when_tenant_disallows() {
        let perms = Permissions::normalize(true, false);
        assert!(!perms.can_edit());
    }

    #[test]
    fn normalize_grants_edit_when_requested_and_allowed() {
        let perms = Permissions::normalize(true, true);
        assert!(perms.can_edit());
    }

    #[test]
    fn expired_lock_is_treated_as_unlocked() {
        let state = LockState::Locked {
            lock_id: "L1".to_string(),
            expires_at: Utc::now() - Duration::seconds(1),
        };
        assert_eq!(state.effective(Utc::now()), LockState::Unlocked);
    }

    #[test]
    fn live_lock_remains_locked() {
        let state = LockState::Locked {
            lock_id: "L1".to_string(),
            expires_at: Utc::now() + Duration::seconds(60),
        };
        assert_eq!(state.effective(Utc::now()), state);
    }

    #[test]
    fn new_session_has_distinct_id_and_file_id() {
        let session = Session::new(
            NewSession {
                tenant_id: Uuid::new_v4(),
                storage_name: "docs".to_string(),
                file_path: "a/b.xlsx".to_string(),
                permissions: Permissions::normalize(false, false),
                account: "acct".to_string(),
                user: None,
                origin_connection_id: None,
                origin_page_id: None,
                ttl: DEFAULT_SESSION_TTL,
            },
            "token".to_string(),
        );
        assert_ne!(session.id, session.file_id);
        assert!(session.expires_at > session.created_at);
    }
}
