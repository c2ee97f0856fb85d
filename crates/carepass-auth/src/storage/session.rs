//! Refresh-token session storage trait.
//!
//! # Implementation Notes
//!
//! Implementations should:
//!
//! - Look sessions up by refresh token hash, never by plaintext
//! - Make [`SessionStorage::rotate`] a single conditional transaction
//! - Write the device and session of a sign-in together
//! - Never log refresh token hashes

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{Device, Session};

/// Storage trait for refresh-token sessions.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Store a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be stored.
    async fn create(&self, session: &Session) -> AuthResult<()>;

    /// Upsert `device` (as [`DeviceStorage::upsert`]) and store `session`
    /// bound to it, in one transaction.
    ///
    /// The stored session's `device_id` is the id of the stored device row,
    /// which differs from `device.id` when the installation was already
    /// registered.
    ///
    /// # Returns
    ///
    /// The stored device and session.
    ///
    /// # Errors
    ///
    /// Returns an error if either write fails; nothing is written then.
    ///
    /// [`DeviceStorage::upsert`]: super::DeviceStorage::upsert
    async fn create_with_device(
        &self,
        device: &Device,
        session: &Session,
    ) -> AuthResult<(Device, Session)>;

    /// Find a session by refresh token hash, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_refresh_hash(&self, refresh_token_hash: &str)
    -> AuthResult<Option<Session>>;

    /// Find a session by its public session ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_session_id(&self, session_id: &str) -> AuthResult<Option<Session>>;

    /// Revoke `old_id` and insert `successor`, atomically.
    ///
    /// # Returns
    ///
    /// `false` (and nothing written) if `old_id` was no longer active,
    /// i.e. a concurrent request rotated it first.
    ///
    /// # Atomicity
    ///
    /// ```sql
    /// UPDATE user_sessions SET status = 'revoked', revoked_at = $2
    /// WHERE id = $1 AND status = 'active'
    /// ```
    ///
    /// followed by the insert, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn rotate(
        &self,
        old_id: Uuid,
        successor: &Session,
        at: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Revoke a session by public session ID.
    ///
    /// # Returns
    ///
    /// `false` if no active session has that ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool>;

    /// Revoke every active session of a user.
    ///
    /// # Returns
    ///
    /// The number of sessions revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_all_for_user(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<u64>;
}
