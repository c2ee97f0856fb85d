//! Domain types shared by the storage traits and the flows.
//!
//! - [`User`] / [`UserProfile`] - accounts and their decrypted view
//! - [`Device`] - registered app installations
//! - [`Session`] - refresh-token sessions
//! - [`ConsentRecord`] - consent decisions captured at onboarding

pub mod consent;
pub mod device;
pub mod session;
pub mod user;

pub use consent::{CONSENT_DATA_TYPE, ConsentAcknowledgments, ConsentRecord, ConsentType};
pub use device::{Device, DeviceRegistration, DeviceStatus, Platform};
pub use session::{Session, SessionStatus};
pub use user::{
    AccountStatus, LinkedIdentity, USER_PII_DATA_TYPE, USER_PII_FIELDS, User, UserProfile,
};
