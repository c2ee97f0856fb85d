//! Device registration types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AuthError, AuthResult};

/// Maximum length of client-supplied device identifiers.
const MAX_DEVICE_FIELD_LEN: usize = 255;

/// Client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iPhone / iPad app.
    Ios,
    /// Android app.
    Android,
    /// Web client.
    Web,
}

impl Platform {
    /// Returns the stored name of the platform.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            "web" => Ok(Self::Web),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Whether a device may hold sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device may hold sessions.
    #[default]
    Active,
    /// Device was signed out; its sessions are revoked.
    Revoked,
}

impl DeviceStatus {
    /// Returns the stored name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

/// Device information sent by the app with a sign-in request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Client platform.
    pub platform: Platform,

    /// Identifier of this app installation, stable across launches.
    pub app_installation_id: String,

    /// Optional hardware/OS fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,

    /// App version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

impl DeviceRegistration {
    /// Checks client-supplied fields.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_DEVICE_INFO` if the installation ID is blank or any
    /// field is too long.
    pub fn validate(&self) -> AuthResult<()> {
        if self.app_installation_id.trim().is_empty() {
            return Err(AuthError::invalid_input(
                "INVALID_DEVICE_INFO",
                "app_installation_id is required",
            ));
        }

        let too_long = [
            Some(&self.app_installation_id),
            self.device_fingerprint.as_ref(),
            self.app_version.as_ref(),
        ]
        .into_iter()
        .flatten()
        .any(|v| v.len() > MAX_DEVICE_FIELD_LEN);

        if too_long {
            return Err(AuthError::invalid_input(
                "INVALID_DEVICE_INFO",
                format!("device fields are limited to {MAX_DEVICE_FIELD_LEN} characters"),
            ));
        }

        Ok(())
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Internal identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Client platform.
    pub platform: Platform,
    /// App installation identifier (unique per user).
    pub app_installation_id: String,
    /// Optional hardware/OS fingerprint.
    pub fingerprint: Option<String>,
    /// App version at last contact.
    pub app_version: Option<String>,
    /// Whether the device may hold sessions.
    pub status: DeviceStatus,
    /// Last authenticated request from this device.
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    /// First registration.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Device {
    /// Creates an active device from a registration.
    #[must_use]
    pub fn register(user_id: Uuid, registration: &DeviceRegistration, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            platform: registration.platform,
            app_installation_id: registration.app_installation_id.trim().to_string(),
            fingerprint: registration.device_fingerprint.clone(),
            app_version: registration.app_version.clone(),
            status: DeviceStatus::Active,
            last_active_at: now,
            created_at: now,
        }
    }

    /// Returns `true` if the device has not been revoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(id: &str) -> DeviceRegistration {
        DeviceRegistration {
            platform: Platform::Ios,
            app_installation_id: id.to_string(),
            device_fingerprint: None,
            app_version: Some("3.2.0".to_string()),
        }
    }

    #[test]
    fn test_validate() {
        assert!(registration("install-1").validate().is_ok());

        let err = registration("  ").validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DEVICE_INFO");

        let err = registration(&"x".repeat(256)).validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_DEVICE_INFO");
    }

    #[test]
    fn test_deserialize_request_shape() {
        let reg: DeviceRegistration = serde_json::from_str(
            r#"{"platform":"android","app_installation_id":"abc","app_version":"1.0"}"#,
        )
        .unwrap();
        assert_eq!(reg.platform, Platform::Android);
        assert!(reg.device_fingerprint.is_none());

        let bad: Result<DeviceRegistration, _> =
            serde_json::from_str(r#"{"platform":"symbian","app_installation_id":"abc"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_register_trims_installation_id() {
        let now = OffsetDateTime::UNIX_EPOCH;
        let device = Device::register(Uuid::new_v4(), &registration(" install-1 "), now);
        assert_eq!(device.app_installation_id, "install-1");
        assert!(device.is_active());
    }
}
