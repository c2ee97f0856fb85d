//! Device storage.
//!
//! `user_devices` is unique per `(user_id, app_installation_id)`; rows are
//! revoked, never deleted.

use carepass_auth::types::{Device, DeviceStatus, Platform};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Types
// =============================================================================

type DeviceTuple = (
    Uuid,
    Uuid,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    OffsetDateTime,
    OffsetDateTime,
);

/// Device record from database.
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub app_installation_id: String,
    pub device_fingerprint: Option<String>,
    pub app_version: Option<String>,
    pub status: String,
    pub last_active_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl DeviceRow {
    fn from_tuple(row: DeviceTuple) -> Self {
        Self {
            id: row.0,
            user_id: row.1,
            platform: row.2,
            app_installation_id: row.3,
            device_fingerprint: row.4,
            app_version: row.5,
            status: row.6,
            last_active_at: row.7,
            created_at: row.8,
        }
    }

    /// Convert into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored platform or status is not recognised.
    pub fn into_device(self) -> StorageResult<Device> {
        Ok(Device {
            id: self.id,
            user_id: self.user_id,
            platform: self
                .platform
                .parse::<Platform>()
                .map_err(StorageError::invalid_input)?,
            app_installation_id: self.app_installation_id,
            fingerprint: self.device_fingerprint,
            app_version: self.app_version,
            status: self
                .status
                .parse::<DeviceStatus>()
                .map_err(StorageError::invalid_input)?,
            last_active_at: self.last_active_at,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Device Storage
// =============================================================================

/// Device storage operations.
pub struct DeviceStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> DeviceStorage<'a> {
    /// Create a new device storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a device or refresh the row for the same installation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert(&self, device: &Device) -> StorageResult<DeviceRow> {
        let mut conn = self.pool.acquire().await?;
        upsert_device(&mut conn, device).await
    }

    /// Find a device by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<DeviceRow>> {
        let row: Option<DeviceTuple> = query_as(
            r#"
            SELECT id, user_id, platform, app_installation_id, device_fingerprint,
                   app_version, status, last_active_at, created_at
            FROM user_devices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(DeviceRow::from_tuple))
    }

    /// Set `last_active_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn touch(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        query("UPDATE user_devices SET last_active_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Revoke a user's device and its active sessions in one transaction.
    ///
    /// Returns `None` if the user has no such device.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn revoke_with_sessions(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        at: OffsetDateTime,
    ) -> StorageResult<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let device =
            query("UPDATE user_devices SET status = 'revoked' WHERE id = $1 AND user_id = $2")
                .bind(device_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        if device.rows_affected() == 0 {
            return Ok(None);
        }

        let sessions = query(
            r#"
            UPDATE user_sessions
            SET status = 'revoked', revoked_at = $2
            WHERE device_id = $1 AND status = 'active'
            "#,
        )
        .bind(device_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(sessions.rows_affected()))
    }
}

pub(crate) async fn upsert_device(
    conn: &mut PgConnection,
    device: &Device,
) -> StorageResult<DeviceRow> {
    let row: DeviceTuple = query_as(
        r#"
        INSERT INTO user_devices (id, user_id, platform, app_installation_id,
                                  device_fingerprint, app_version, status,
                                  last_active_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8)
        ON CONFLICT (user_id, app_installation_id) DO UPDATE SET
            platform = EXCLUDED.platform,
            device_fingerprint = EXCLUDED.device_fingerprint,
            app_version = EXCLUDED.app_version,
            status = 'active',
            last_active_at = EXCLUDED.last_active_at
        RETURNING id, user_id, platform, app_installation_id, device_fingerprint,
                  app_version, status, last_active_at, created_at
        "#,
    )
    .bind(device.id)
    .bind(device.user_id)
    .bind(device.platform.as_str())
    .bind(&device.app_installation_id)
    .bind(&device.fingerprint)
    .bind(&device.app_version)
    .bind(device.last_active_at)
    .bind(device.created_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(DeviceRow::from_tuple(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row() -> DeviceRow {
        DeviceRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            platform: "ios".to_string(),
            app_installation_id: "install-1".to_string(),
            device_fingerprint: None,
            app_version: Some("2.4.0".to_string()),
            status: "revoked".to_string(),
            last_active_at: datetime!(2026-03-01 09:00 UTC),
            created_at: datetime!(2026-02-01 09:00 UTC),
        }
    }

    #[test]
    fn test_into_device() {
        let device = row().into_device().unwrap();
        assert_eq!(device.platform, Platform::Ios);
        assert_eq!(device.status, DeviceStatus::Revoked);
        assert_eq!(device.app_version.as_deref(), Some("2.4.0"));
    }

    #[test]
    fn test_unknown_platform() {
        let mut row = row();
        row.platform = "symbian".to_string();
        let err = row.into_device().unwrap_err();
        assert_eq!(err.to_string(), "Invalid input: unknown platform: symbian");
    }
}
