//! Access/refresh token issuance and rotation.
//!
//! # Token Pair
//!
//! - access token: signed JWT, short-lived (1 hour by default)
//! - refresh token: 256-bit random string; only its SHA-256 hash is stored
//!
//! # Rotation
//!
//! Every refresh revokes the presented session and creates a successor in
//! the same storage transaction. A refresh token is therefore usable once;
//! presenting it again fails with `INVALID_REFRESH_TOKEN`.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::account::ProfileVault;
use crate::clock::{Clock, to_time_duration};
use crate::storage::AuthStorage;
use crate::token::{
    ACCESS_TOKEN_USE, AccessTokenClaims, JwtError, JwtService, generate_refresh_token,
    generate_session_id, hash_refresh_token,
};
use crate::types::{Device, DeviceRegistration, Session, SessionStatus, User, UserProfile};
use crate::{AuthError, AuthResult};

/// Request metadata stored on sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Client IP address.
    pub source_ip: Option<String>,
}

/// A freshly issued token pair.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Signed access token.
    pub access_token: String,
    /// Opaque refresh token. Returned to the client once, never stored.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// The stored session.
    pub session: Session,
    /// The device the session is bound to.
    pub device: Option<Device>,
    /// The account the session belongs to.
    pub user: User,
    /// Decrypted profile of `user`.
    pub profile: UserProfile,
}

/// Issues, rotates and revokes sessions.
pub struct SessionIssuer {
    jwt: JwtService,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
    storage: AuthStorage,
    vault: ProfileVault,
    clock: Arc<dyn Clock>,
}

impl SessionIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        jwt: JwtService,
        access_token_lifetime: Duration,
        refresh_token_lifetime: Duration,
        storage: AuthStorage,
        vault: ProfileVault,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            jwt,
            access_token_lifetime,
            refresh_token_lifetime,
            storage,
            vault,
            clock,
        }
    }

    /// Issues a token pair for a signed-in user.
    ///
    /// When `device` is given the device row is upserted (reactivating a
    /// revoked one) and the session is bound to it, in one storage write.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DEVICE_INFO` for malformed device info, or storage,
    /// encryption and signing errors.
    pub async fn issue(
        &self,
        user: &User,
        device: Option<&DeviceRegistration>,
        client: &ClientInfo,
    ) -> AuthResult<IssuedSession> {
        let now = self.clock.now();

        if let Some(registration) = device {
            registration.validate()?;
        }

        let profile = self.vault.open_user(user).await?;
        let refresh_token = generate_refresh_token();
        let session = self.new_session(user.id, None, &refresh_token, client, now);

        let (session, device) = match device {
            Some(registration) => {
                let (stored, session) = self
                    .storage
                    .sessions
                    .create_with_device(&Device::register(user.id, registration, now), &session)
                    .await?;
                (session, Some(stored))
            }
            None => {
                self.storage.sessions.create(&session).await?;
                (session, None)
            }
        };

        let access_token = self.access_token(&profile, &session.session_id, now)?;
        tracing::debug!(
            user_id = %user.id,
            session_id = %session.session_id,
            device_bound = device.is_some(),
            "Session issued"
        );

        Ok(IssuedSession {
            access_token,
            refresh_token,
            expires_in: self.access_token_lifetime.as_secs(),
            session,
            device,
            user: user.clone(),
            profile,
        })
    }

    /// Exchanges a refresh token for a new pair, revoking the old session.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_REFRESH_TOKEN` if the token is unknown, revoked,
    /// expired, bound to another device, already rotated, or its account is
    /// gone or inactive. Storage failures propagate unchanged.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device_id: Option<&str>,
        client: &ClientInfo,
    ) -> AuthResult<IssuedSession> {
        let now = self.clock.now();
        let refresh_token = refresh_token.trim();
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let Some(current) = self
            .storage
            .sessions
            .find_by_refresh_hash(&hash_refresh_token(refresh_token))
            .await?
        else {
            tracing::debug!("Refresh token not found");
            return Err(AuthError::InvalidRefreshToken);
        };

        if !current.is_usable(now) {
            tracing::debug!(session_id = %current.session_id, "Refresh token revoked or expired");
            return Err(AuthError::InvalidRefreshToken);
        }

        if let Some(requested) = device_id {
            let requested = Uuid::parse_str(requested.trim()).ok();
            if requested.is_none() || requested != current.device_id {
                tracing::warn!(
                    session_id = %current.session_id,
                    "Refresh token presented from another device"
                );
                return Err(AuthError::InvalidRefreshToken);
            }
        }

        let user = match self.storage.users.find_by_id(current.user_id).await? {
            Some(user) if user.is_active() => user,
            _ => {
                tracing::debug!(user_id = %current.user_id, "Refresh for missing or inactive account");
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        let refresh_token = generate_refresh_token();
        let successor = self.new_session(
            user.id,
            current.device_id,
            &refresh_token,
            client,
            now,
        );

        if !self
            .storage
            .sessions
            .rotate(current.id, &successor, now)
            .await?
        {
            tracing::warn!(session_id = %current.session_id, "Refresh token rotated concurrently");
            return Err(AuthError::InvalidRefreshToken);
        }

        let device = match current.device_id {
            Some(device_id) => {
                self.storage.devices.touch(device_id, now).await?;
                self.storage.devices.find_by_id(device_id).await?
            }
            None => None,
        };

        let profile = self.vault.open_user(&user).await?;
        let access_token = self.access_token(&profile, &successor.session_id, now)?;
        tracing::debug!(
            user_id = %user.id,
            old_session_id = %current.session_id,
            session_id = %successor.session_id,
            "Session rotated"
        );

        Ok(IssuedSession {
            access_token,
            refresh_token,
            expires_in: self.access_token_lifetime.as_secs(),
            session: successor,
            device,
            user,
            profile,
        })
    }

    /// Revokes a session by its public ID.
    ///
    /// # Errors
    ///
    /// Returns `SESSION_NOT_FOUND` if no active session has that ID.
    pub async fn revoke(&self, session_id: &str) -> AuthResult<()> {
        if self
            .storage
            .sessions
            .revoke(session_id, self.clock.now())
            .await?
        {
            tracing::info!(session_id = %session_id, "Session revoked");
            Ok(())
        } else {
            Err(AuthError::session_not_found(format!("Session {session_id}")))
        }
    }

    /// Revokes a device and every session bound to it.
    ///
    /// # Returns
    ///
    /// The number of sessions revoked.
    ///
    /// # Errors
    ///
    /// Returns `SESSION_NOT_FOUND` if the user has no such device.
    pub async fn revoke_device(&self, user_id: Uuid, device_id: Uuid) -> AuthResult<u64> {
        match self
            .storage
            .devices
            .revoke_with_sessions(user_id, device_id, self.clock.now())
            .await?
        {
            Some(revoked) => {
                tracing::info!(user_id = %user_id, device_id = %device_id, revoked, "Device revoked");
                Ok(revoked)
            }
            None => Err(AuthError::session_not_found(format!("Device {device_id}"))),
        }
    }

    /// Decodes and validates an access token issued by this service.
    ///
    /// # Errors
    ///
    /// Returns the JWT validation error.
    pub fn decode_access_token(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        let claims: AccessTokenClaims = self.jwt.decode(token, self.clock.now())?;
        if claims.token_use != ACCESS_TOKEN_USE {
            return Err(JwtError::invalid_claims("not an access token"));
        }
        Ok(claims)
    }

    fn new_session(
        &self,
        user_id: Uuid,
        device_id: Option<Uuid>,
        refresh_token: &str,
        client: &ClientInfo,
        now: OffsetDateTime,
    ) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id,
            device_id,
            session_id: generate_session_id(),
            refresh_token_hash: hash_refresh_token(refresh_token),
            expires_at: now + to_time_duration(self.refresh_token_lifetime),
            user_agent: client.user_agent.clone(),
            source_ip: client.source_ip.clone(),
            status: SessionStatus::Active,
            created_at: now,
            revoked_at: None,
        }
    }

    fn access_token(
        &self,
        profile: &UserProfile,
        session_id: &str,
        now: OffsetDateTime,
    ) -> AuthResult<String> {
        let iat = now.unix_timestamp();
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: profile.user_id.to_string(),
            user_id: profile.user_id.to_string(),
            email: profile.email.clone(),
            name: profile.name.clone(),
            session_id: session_id.to_string(),
            iat,
            exp: iat + i64::try_from(self.access_token_lifetime.as_secs()).unwrap_or(i64::MAX / 2),
            jti: Uuid::new_v4().to_string(),
            token_use: ACCESS_TOKEN_USE.to_string(),
        };
        Ok(self.jwt.encode(&claims)?)
    }
}
