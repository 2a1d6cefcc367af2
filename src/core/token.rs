//! Short-lived, signed access tokens bound to a session.
//!
//! Tokens are stateless and verifiable offline via a keyed MAC, but the
//! session row remains the authority: callers must still load the session
//! and independently check `expires_at` after signature verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Session id (subject).
    sid: Uuid,
    /// Standard JWT expiry (seconds since epoch).
    exp: i64,
}

/// The validated payload of an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPayload {
    pub session_id: Uuid,
    pub exp: DateTime<Utc>,
}

/// Issues and validates HMAC-signed access tokens.
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// Sign a token for `session_id` expiring at `exp`.
    ///
    /// # Errors
    /// Returns an error if the token cannot be encoded.
    pub fn issue(&self, session_id: Uuid, exp: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = Claims { sid: session_id, exp: exp.timestamp() };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|source| TokenError::Sign { source })
    }

    /// Verify a token's signature and decode its payload. This does **not**
    /// consult the session store; the caller must still cross-check the
    /// session row.
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] on a malformed or mis-signed token,
    /// and [`TokenError::Expired`] once the embedded `exp` has passed.
    pub fn validate(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        // We apply our own expiry check against the session row afterward,
        // but still want jsonwebtoken to reject tokens that are expired on
        // their own terms up front.
        validation.leeway = 0;

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|source| match source.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid { source },
            })?;

        let exp = DateTime::from_timestamp(data.claims.exp, 0).ok_or(TokenError::Expired)?;

        Ok(TokenPayload { session_id: data.claims.sid, exp })
    }
}

/// Default token TTL; must match the row's `expires_at`.
#[must_use]
pub fn default_ttl() -> Duration {
    crate::core::session::DEFAULT_SESSION_TTL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_token() {
        let svc = TokenService::new("test-secret");
        let session_id = Uuid::new_v4();
        let exp = Utc::now() + Duration::seconds(60);
        let token = svc.issue(session_id, exp).unwrap();

        let payload = svc.validate(&token).unwrap();
        assert_eq!(payload.session_id, session_id);
    }

    #[test]
    fn rejects_a_tampered_token() {
        let svc = TokenService::new("test-secret");
        let other = TokenService::new("other-secret");
        let token = other.issue(Uuid::new_v4(), Utc::now() + Duration::seconds(60)).unwrap();

        assert!(matches!(svc.validate(&token), Err(TokenError::Invalid { .. })));
    }

    #[test]
    fn rejects_an_expired_token() {
        let svc = TokenService::new("test-secret");
        let token = svc
            .issue(Uuid::new_v4(), Utc::now() - Duration::seconds(1))
            .unwrap();

        assert!(matches!(svc.validate(&token), Err(TokenError::Expired)));
    }
}
