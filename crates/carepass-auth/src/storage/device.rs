//! Device storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::Device;

/// Storage operations for registered devices.
///
/// Devices are unique per `(user_id, app_installation_id)` and are never
/// hard-deleted.
#[async_trait]
pub trait DeviceStorage: Send + Sync {
    /// Insert a device, or refresh the existing row for the same
    /// `(user_id, app_installation_id)`.
    ///
    /// An existing row keeps its `id` and `created_at`; platform, version,
    /// fingerprint and `last_active_at` are updated and a revoked row is
    /// reactivated.
    ///
    /// # Returns
    ///
    /// The stored device.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn upsert(&self, device: &Device) -> AuthResult<Device>;

    /// Find a device by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, device_id: Uuid) -> AuthResult<Option<Device>>;

    /// Update `last_active_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn touch(&self, device_id: Uuid, at: OffsetDateTime) -> AuthResult<()>;

    /// Revoke a user's device and all of its active sessions in one
    /// transaction.
    ///
    /// # Returns
    ///
    /// `None` if the user has no such device, otherwise the number of
    /// sessions revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_with_sessions(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        at: OffsetDateTime,
    ) -> AuthResult<Option<u64>>;
}
