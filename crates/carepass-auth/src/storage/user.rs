//! User storage trait.
//!
//! Defines the interface for user persistence operations.
//! Implementations are provided by storage backends (e.g., PostgreSQL).

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::federation::AuthProvider;
use crate::types::{ConsentRecord, LinkedIdentity, User};

/// Storage operations for users.
///
/// PII columns of [`User`] arrive already encrypted; implementations store
/// them verbatim and never see plaintext.
///
/// # Example
///
/// ```ignore
/// use carepass_auth::storage::UserStorage;
///
/// async fn example(storage: &impl UserStorage) {
///     if let Some(user) = storage.find_by_email_hash(&hash_email("a@x.com")).await? {
///         println!("Found user: {}", user.id);
///     }
/// }
/// ```
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Find a user by their unique ID.
    ///
    /// Returns `None` if the user doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, user_id: Uuid) -> AuthResult<Option<User>>;

    /// Find the user owning a provider credential.
    ///
    /// Matches the primary credential `(auth_provider, external_id)` as well
    /// as any linked identity.
    ///
    /// # Arguments
    ///
    /// * `provider` - The identity provider
    /// * `subject_id` - The subject identifier at the provider
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject_id: &str,
    ) -> AuthResult<Option<User>>;

    /// Find a user by the deterministic hash of their e-mail address.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_email_hash(&self, email_hash: &str) -> AuthResult<Option<User>>;

    /// Create a user together with their consent records, atomically.
    ///
    /// # Errors
    ///
    /// Returns `AccountConflict` if the credential or e-mail hash is already
    /// registered, or an error if the storage operation fails. On error
    /// nothing is written.
    async fn create_with_consents(&self, user: &User, consents: &[ConsentRecord])
    -> AuthResult<()>;

    /// Record a successful sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn update_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<()>;

    /// Attach an alternate provider credential.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the credential was already attached to this user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user doesn't exist, `AccountConflict` if the
    /// credential belongs to another user, or an error if the storage
    /// operation fails.
    async fn add_linked_identity(
        &self,
        user_id: Uuid,
        identity: &LinkedIdentity,
    ) -> AuthResult<bool>;
}
