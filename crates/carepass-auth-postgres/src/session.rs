//! Refresh-token session storage.
//!
//! Sessions are looked up by the SHA-256 of the refresh token. Rotation
//! revokes the old row and inserts its successor in one transaction, guarded
//! by `status = 'active'` so only one concurrent rotation wins. A sign-in
//! writes its device row and session together.

use carepass_auth::types::{Device, Session, SessionStatus};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::device::{DeviceRow, upsert_device};
use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Types
// =============================================================================

type SessionTuple = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    String,
    OffsetDateTime,
    Option<String>,
    Option<String>,
    String,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

/// Session record from database.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Option<Uuid>,
    pub session_id: String,
    pub refresh_token_hash: String,
    pub expires_at: OffsetDateTime,
    pub user_agent: Option<String>,
    pub source_ip: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
}

impl SessionRow {
    fn from_tuple(row: SessionTuple) -> Self {
        Self {
            id: row.0,
            user_id: row.1,
            device_id: row.2,
            session_id: row.3,
            refresh_token_hash: row.4,
            expires_at: row.5,
            user_agent: row.6,
            source_ip: row.7,
            status: row.8,
            created_at: row.9,
            revoked_at: row.10,
        }
    }

    /// Convert into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored status is not recognised.
    pub fn into_session(self) -> StorageResult<Session> {
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            device_id: self.device_id,
            session_id: self.session_id,
            refresh_token_hash: self.refresh_token_hash,
            expires_at: self.expires_at,
            user_agent: self.user_agent,
            source_ip: self.source_ip,
            status: self
                .status
                .parse::<SessionStatus>()
                .map_err(StorageError::invalid_input)?,
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        })
    }
}

// =============================================================================
// Session Storage
// =============================================================================

/// Session storage operations.
pub struct SessionStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionStorage<'a> {
    /// Create a new session storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub async fn create(&self, session: &Session) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, session).await
    }

    /// Upsert a device and insert a session bound to the stored row, in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if either statement fails; the transaction is then
    /// rolled back.
    pub async fn create_with_device(
        &self,
        device: &Device,
        session: &Session,
    ) -> StorageResult<(DeviceRow, Session)> {
        let mut tx = self.pool.begin().await?;

        let stored = upsert_device(&mut tx, device).await?;
        let mut session = session.clone();
        session.device_id = Some(stored.id);
        insert_session(&mut tx, &session).await?;

        tx.commit().await?;
        Ok((stored, session))
    }

    /// Find a session by refresh token hash, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_refresh_hash(&self, hash: &str) -> StorageResult<Option<SessionRow>> {
        let row: Option<SessionTuple> = query_as(
            r#"
            SELECT id, user_id, device_id, session_id, refresh_token_hash, expires_at,
                   user_agent, source_ip, status, created_at, revoked_at
            FROM user_sessions
            WHERE refresh_token_hash = $1
            "#,
        )
        .bind(hash)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(SessionRow::from_tuple))
    }

    /// Find a session by public session ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_session_id(&self, session_id: &str) -> StorageResult<Option<SessionRow>> {
        let row: Option<SessionTuple> = query_as(
            r#"
            SELECT id, user_id, device_id, session_id, refresh_token_hash, expires_at,
                   user_agent, source_ip, status, created_at, revoked_at
            FROM user_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(SessionRow::from_tuple))
    }

    /// Revoke `old_id` and insert `successor` in one transaction.
    ///
    /// Returns `false` without writing if `old_id` is no longer active.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn rotate(
        &self,
        old_id: Uuid,
        successor: &Session,
        at: OffsetDateTime,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        let revoked = query(
            r#"
            UPDATE user_sessions
            SET status = 'revoked', revoked_at = $2
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(old_id)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            return Ok(false);
        }

        insert_session(&mut tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Revoke an active session by public ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn revoke(&self, session_id: &str, at: OffsetDateTime) -> StorageResult<bool> {
        let result = query(
            r#"
            UPDATE user_sessions
            SET status = 'revoked', revoked_at = $2
            WHERE session_id = $1 AND status = 'active'
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Revoke every active session of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> StorageResult<u64> {
        let result = query(
            r#"
            UPDATE user_sessions
            SET status = 'revoked', revoked_at = $2
            WHERE user_id = $1 AND status = 'active'
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

async fn insert_session(conn: &mut PgConnection, session: &Session) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO user_sessions (id, user_id, device_id, session_id, refresh_token_hash,
                                   expires_at, user_agent, source_ip, status, created_at,
                                   revoked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(session.device_id)
    .bind(&session.session_id)
    .bind(&session.refresh_token_hash)
    .bind(session.expires_at)
    .bind(&session.user_agent)
    .bind(&session.source_ip)
    .bind(session.status.as_str())
    .bind(session.created_at)
    .bind(session.revoked_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
