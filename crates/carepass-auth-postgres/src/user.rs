//! User account storage.
//!
//! One row per account in `users`. The primary credential lives in
//! `(auth_provider, external_id)`; alternate credentials are a JSONB array in
//! `linked_identities`.

use carepass_auth::federation::AuthProvider;
use carepass_auth::types::{AccountStatus, ConsentRecord, LinkedIdentity, User};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::consent::insert_consent;
use crate::{PgPool, StorageError, StorageResult, unique_violation};

// =============================================================================
// Types
// =============================================================================

type UserTuple = (
    Uuid,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    Option<bool>,
    String,
    serde_json::Value,
    OffsetDateTime,
    Option<OffsetDateTime>,
    Option<OffsetDateTime>,
);

/// User record from database.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub external_id: String,
    pub auth_provider: String,
    /// Sealed e-mail.
    pub email: String,
    pub email_hash: String,
    /// Sealed display name.
    pub name: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email_verified: bool,
    pub is_private_email: Option<bool>,
    pub account_status: String,
    /// JSON array of [`LinkedIdentity`].
    pub linked_identities: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
    pub deactivated_at: Option<OffsetDateTime>,
}

impl UserRow {
    fn from_tuple(row: UserTuple) -> Self {
        Self {
            id: row.0,
            external_id: row.1,
            auth_provider: row.2,
            email: row.3,
            email_hash: row.4,
            name: row.5,
            given_name: row.6,
            family_name: row.7,
            email_verified: row.8,
            is_private_email: row.9,
            account_status: row.10,
            linked_identities: row.11,
            created_at: row.12,
            last_login_at: row.13,
            deactivated_at: row.14,
        }
    }

    /// Convert into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored enum value or the linked identity array
    /// is not recognised.
    pub fn into_user(self) -> StorageResult<User> {
        let auth_provider = self
            .auth_provider
            .parse::<AuthProvider>()
            .map_err(|e| StorageError::invalid_input(e.to_string()))?;
        let account_status = self
            .account_status
            .parse::<AccountStatus>()
            .map_err(StorageError::invalid_input)?;
        let linked_identities = if self.linked_identities.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(self.linked_identities)?
        };

        Ok(User {
            id: self.id,
            external_id: self.external_id,
            auth_provider,
            email: self.email,
            email_hash: self.email_hash,
            name: self.name,
            given_name: self.given_name,
            family_name: self.family_name,
            email_verified: self.email_verified,
            is_private_email: self.is_private_email,
            account_status,
            linked_identities,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
            deactivated_at: self.deactivated_at,
        })
    }
}

// =============================================================================
// User Storage
// =============================================================================

/// User storage operations.
pub struct UserStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> UserStorage<'a> {
    /// Create a new user storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<UserRow>> {
        let row: Option<UserTuple> = query_as(
            r#"
            SELECT id, external_id, auth_provider, email, email_hash, name,
                   given_name, family_name, email_verified, is_private_email,
                   account_status, linked_identities, created_at, last_login_at,
                   deactivated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(UserRow::from_tuple))
    }

    /// Find the user owning a provider credential, primary or linked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject_id: &str,
    ) -> StorageResult<Option<UserRow>> {
        let row: Option<UserTuple> = query_as(
            r#"
            SELECT id, external_id, auth_provider, email, email_hash, name,
                   given_name, family_name, email_verified, is_private_email,
                   account_status, linked_identities, created_at, last_login_at,
                   deactivated_at
            FROM users
            WHERE (auth_provider = $1 AND external_id = $2)
               OR linked_identities @> jsonb_build_array(
                    jsonb_build_object('provider', $1::text, 'subject_id', $2::text))
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(provider.as_str())
        .bind(subject_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(UserRow::from_tuple))
    }

    /// Find a user by e-mail hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_email_hash(&self, email_hash: &str) -> StorageResult<Option<UserRow>> {
        let row: Option<UserTuple> = query_as(
            r#"
            SELECT id, external_id, auth_provider, email, email_hash, name,
                   given_name, family_name, email_verified, is_private_email,
                   account_status, linked_identities, created_at, last_login_at,
                   deactivated_at
            FROM users
            WHERE email_hash = $1
            "#,
        )
        .bind(email_hash)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(UserRow::from_tuple))
    }

    /// Insert a user and their consent records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the credential or e-mail hash is already
    /// registered, or an error if the database operation fails.
    pub async fn create_with_consents(
        &self,
        user: &User,
        consents: &[ConsentRecord],
    ) -> StorageResult<()> {
        let linked = serde_json::to_value(&user.linked_identities)?;
        let mut tx = self.pool.begin().await?;

        lock_credential(&mut tx, user.auth_provider, &user.external_id).await?;
        if credential_owner(&mut tx, user.auth_provider, &user.external_id)
            .await?
            .is_some()
        {
            return Err(StorageError::conflict(
                "provider identity is already registered",
            ));
        }

        query(
            r#"
            INSERT INTO users (id, external_id, auth_provider, email, email_hash, name,
                               given_name, family_name, email_verified, is_private_email,
                               account_status, linked_identities, created_at, last_login_at,
                               deactivated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(user.id)
        .bind(&user.external_id)
        .bind(user.auth_provider.as_str())
        .bind(&user.email)
        .bind(&user.email_hash)
        .bind(&user.name)
        .bind(&user.given_name)
        .bind(&user.family_name)
        .bind(user.email_verified)
        .bind(user.is_private_email)
        .bind(user.account_status.as_str())
        .bind(&linked)
        .bind(user.created_at)
        .bind(user.last_login_at)
        .bind(user.deactivated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            unique_violation(e, |constraint| match constraint {
                Some(name) if name.contains("email_hash") => {
                    "email is already registered".to_string()
                }
                _ => "provider identity is already registered".to_string(),
            })
        })?;

        for record in consents {
            insert_consent(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Set `last_login_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn update_last_login(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Append a linked identity.
    ///
    /// Returns `Ok(false)` if the credential is already this user's.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if another user owns the credential, `NotFound` if
    /// the user doesn't exist, or an error if the database operation fails.
    pub async fn add_linked_identity(
        &self,
        id: Uuid,
        identity: &LinkedIdentity,
    ) -> StorageResult<bool> {
        let entry = serde_json::to_value([identity])?;
        let mut tx = self.pool.begin().await?;

        lock_credential(&mut tx, identity.provider, &identity.subject_id).await?;
        match credential_owner(&mut tx, identity.provider, &identity.subject_id).await? {
            Some(owner) if owner == id => return Ok(false),
            Some(_) => {
                return Err(StorageError::conflict(
                    "provider identity belongs to another account",
                ));
            }
            None => {}
        }

        let result = query(
            r#"
            UPDATE users
            SET linked_identities = COALESCE(linked_identities, '[]'::jsonb) || $2::jsonb
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&entry)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(format!("User {id}")));
        }

        tx.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// Credential helpers
// =============================================================================

/// Serializes writers of the same provider credential until commit.
///
/// The linked identity array has no unique index, so concurrent attempts to
/// register or link one credential are ordered by this advisory lock.
async fn lock_credential(
    conn: &mut sqlx_postgres::PgConnection,
    provider: AuthProvider,
    subject_id: &str,
) -> StorageResult<()> {
    query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("{}:{}", provider.as_str(), subject_id))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn credential_owner(
    conn: &mut sqlx_postgres::PgConnection,
    provider: AuthProvider,
    subject_id: &str,
) -> StorageResult<Option<Uuid>> {
    let owner: Option<(Uuid,)> = query_as(
        r#"
        SELECT id FROM users
        WHERE (auth_provider = $1 AND external_id = $2)
           OR linked_identities @> jsonb_build_array(
                jsonb_build_object('provider', $1::text, 'subject_id', $2::text))
        LIMIT 1
        "#,
    )
    .bind(provider.as_str())
    .bind(subject_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(owner.map(|(id,)| id))
}

// =============================================================================
// Tests
// =============================================================================
