//! Refresh-token session type.
//!
//! One [`Session`] row exists per issued refresh token. Rotation revokes the
//! row and inserts a successor, so a refresh token is usable exactly once.
//!
//! # Security
//!
//! - Refresh tokens are stored as SHA-256 hashes, never plaintext
//! - Sessions are revoked individually, per device, or per user

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Refresh token may be used.
    #[default]
    Active,
    /// Superseded by rotation or signed out.
    Revoked,
}

impl SessionStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// A refresh-token session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Row identifier.
    pub id: Uuid,

    /// Owning user.
    pub user_id: Uuid,

    /// Device the session was issued to, if the client sent device info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,

    /// Public session identifier (`sess_...`), embedded in access tokens.
    pub session_id: String,

    /// SHA-256 hash of the refresh token.
    pub refresh_token_hash: String,

    /// When the refresh token stops being accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// `User-Agent` of the issuing request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Client IP of the issuing request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    /// Session state.
    pub status: SessionStatus,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the session was revoked.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl Session {
    /// Returns `true` if the session has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the session has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.status == SessionStatus::Revoked
    }

    /// Returns `true` if the refresh token may be exchanged at `now`.
    #[must_use]
    pub fn is_usable(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    fn session() -> Session {
        let now = datetime!(2026-03-01 09:00 UTC);
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_id: None,
            session_id: "sess_1".to_string(),
            refresh_token_hash: "h".repeat(64),
            expires_at: now + Duration::days(7),
            user_agent: None,
            source_ip: None,
            status: SessionStatus::Active,
            created_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn test_usable_window() {
        let session = session();
        let now = session.created_at;
        assert!(session.is_usable(now));
        assert!(session.is_usable(now + Duration::days(7) - Duration::seconds(1)));
        assert!(!session.is_usable(now + Duration::days(7)));
    }

    #[test]
    fn test_revoked_not_usable() {
        let mut session = session();
        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(session.created_at);
        assert!(!session.is_usable(session.created_at));
    }
}
