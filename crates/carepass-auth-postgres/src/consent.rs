//! Consent record storage.
//!
//! `consent_records` is append-only.

use carepass_auth::types::{ConsentRecord, ConsentType};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Types
// =============================================================================

/// Consent record from database.
#[derive(Debug, Clone)]
pub struct ConsentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub consent_type: String,
    pub granted: bool,
    pub source_ip: Option<String>,
    pub recorded_at: OffsetDateTime,
}

impl ConsentRow {
    fn from_tuple(row: (Uuid, Uuid, String, bool, Option<String>, OffsetDateTime)) -> Self {
        Self {
            id: row.0,
            user_id: row.1,
            consent_type: row.2,
            granted: row.3,
            source_ip: row.4,
            recorded_at: row.5,
        }
    }

    /// Convert into the domain type.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored consent type is not recognised.
    pub fn into_record(self) -> StorageResult<ConsentRecord> {
        Ok(ConsentRecord {
            id: self.id,
            user_id: self.user_id,
            consent_type: self
                .consent_type
                .parse::<ConsentType>()
                .map_err(StorageError::invalid_input)?,
            granted: self.granted,
            source_ip: self.source_ip,
            recorded_at: self.recorded_at,
        })
    }
}

// =============================================================================
// Consent Storage
// =============================================================================

/// Consent storage operations.
pub struct ConsentStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ConsentStorage<'a> {
    /// Create a new consent storage with a connection pool reference.
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Append records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub async fn record(&self, records: &[ConsentRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_consent(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// List a user's records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_for_user(&self, user_id: Uuid) -> StorageResult<Vec<ConsentRow>> {
        let rows: Vec<(Uuid, Uuid, String, bool, Option<String>, OffsetDateTime)> = query_as(
            r#"
            SELECT id, user_id, consent_type, granted, source_ip, recorded_at
            FROM consent_records
            WHERE user_id = $1
            ORDER BY recorded_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(ConsentRow::from_tuple).collect())
    }
}

/// Insert one record on an open connection or transaction.
pub(crate) async fn insert_consent(
    conn: &mut PgConnection,
    record: &ConsentRecord,
) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO consent_records (id, user_id, consent_type, granted, source_ip, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(record.consent_type.as_str())
    .bind(record.granted)
    .bind(&record.source_ip)
    .bind(record.recorded_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(consent_type: &str) -> ConsentRow {
        ConsentRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            consent_type: consent_type.to_string(),
            granted: true,
            source_ip: Some("203.0.113.7".to_string()),
            recorded_at: datetime!(2026-03-01 09:00 UTC),
        }
    }

    #[test]
    fn test_into_record() {
        let record = row("terms_of_service").into_record().unwrap();
        assert_eq!(record.consent_type, ConsentType::TermsOfService);
        assert!(record.granted);
        assert_eq!(record.source_ip.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_unknown_consent_type() {
        assert!(row("marketing").into_record().is_err());
    }
}
