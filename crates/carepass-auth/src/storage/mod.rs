//! Storage traits for accounts, devices, sessions and consents.
//!
//! # Implementations
//!
//! - [`memory::InMemoryAuthStorage`] - process-local, for development and tests
//! - `carepass-auth-postgres` - PostgreSQL storage backend

use std::sync::Arc;

pub mod consent;
pub mod device;
pub mod memory;
pub mod session;
pub mod user;

pub use consent::ConsentStorage;
pub use device::DeviceStorage;
pub use memory::InMemoryAuthStorage;
pub use session::SessionStorage;
pub use user::UserStorage;

/// The storage handles the flows depend on.
#[derive(Clone)]
pub struct AuthStorage {
    /// User accounts.
    pub users: Arc<dyn UserStorage>,
    /// Registered devices.
    pub devices: Arc<dyn DeviceStorage>,
    /// Refresh-token sessions.
    pub sessions: Arc<dyn SessionStorage>,
    /// Consent records.
    pub consents: Arc<dyn ConsentStorage>,
}

impl AuthStorage {
    /// Bundles a backend implementing every storage trait.
    #[must_use]
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: UserStorage + DeviceStorage + SessionStorage + ConsentStorage + 'static,
    {
        Self {
            users: backend.clone(),
            devices: backend.clone(),
            sessions: backend.clone(),
            consents: backend,
        }
    }

    /// Storage backed by a fresh [`InMemoryAuthStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryAuthStorage::new()))
    }
}
