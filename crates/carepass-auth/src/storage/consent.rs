//! Consent record storage trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::ConsentRecord;

/// Storage operations for consent records.
///
/// Records are append-only; a later decision is a new row.
#[async_trait]
pub trait ConsentStorage: Send + Sync {
    /// Append consent records.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn record_consents(&self, records: &[ConsentRecord]) -> AuthResult<()>;

    /// List a user's consent records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<ConsentRecord>>;
}
