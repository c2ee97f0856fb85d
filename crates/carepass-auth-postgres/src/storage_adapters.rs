//! `carepass_auth` storage trait implementations.
//!
//! [`PostgresAuthStorage`] owns an `Arc<PgPool>`, so each trait method opens
//! the lifetime-based table storage on the shared pool and maps rows back to
//! domain types.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use carepass_auth::AuthResult;
use carepass_auth::federation::AuthProvider;
use carepass_auth::storage::{
    ConsentStorage as ConsentStorageTrait, DeviceStorage as DeviceStorageTrait,
    SessionStorage as SessionStorageTrait, UserStorage as UserStorageTrait,
};
use carepass_auth::types::{ConsentRecord, Device, LinkedIdentity, Session, User};

use crate::PostgresAuthStorage;

// =============================================================================
// Users
// =============================================================================

#[async_trait]
impl UserStorageTrait for PostgresAuthStorage {
    async fn find_by_id(&self, user_id: Uuid) -> AuthResult<Option<User>> {
        match self.users().find_by_id(user_id).await? {
            Some(row) => Ok(Some(row.into_user()?)),
            None => Ok(None),
        }
    }

    async fn find_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject_id: &str,
    ) -> AuthResult<Option<User>> {
        match self
            .users()
            .find_by_provider_subject(provider, subject_id)
            .await?
        {
            Some(row) => Ok(Some(row.into_user()?)),
            None => Ok(None),
        }
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> AuthResult<Option<User>> {
        match self.users().find_by_email_hash(email_hash).await? {
            Some(row) => Ok(Some(row.into_user()?)),
            None => Ok(None),
        }
    }

    async fn create_with_consents(
        &self,
        user: &User,
        consents: &[ConsentRecord],
    ) -> AuthResult<()> {
        self.users().create_with_consents(user, consents).await?;
        tracing::debug!(user_id = %user.id, consents = consents.len(), "User created");
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        self.users().update_last_login(user_id, at).await?;
        Ok(())
    }

    async fn add_linked_identity(
        &self,
        user_id: Uuid,
        identity: &LinkedIdentity,
    ) -> AuthResult<bool> {
        Ok(self.users().add_linked_identity(user_id, identity).await?)
    }
}

// =============================================================================
// Devices
// =============================================================================

#[async_trait]
impl DeviceStorageTrait for PostgresAuthStorage {
    async fn upsert(&self, device: &Device) -> AuthResult<Device> {
        Ok(self.devices().upsert(device).await?.into_device()?)
    }

    async fn find_by_id(&self, device_id: Uuid) -> AuthResult<Option<Device>> {
        match self.devices().find_by_id(device_id).await? {
            Some(row) => Ok(Some(row.into_device()?)),
            None => Ok(None),
        }
    }

    async fn touch(&self, device_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        self.devices().touch(device_id, at).await?;
        Ok(())
    }

    async fn revoke_with_sessions(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        at: OffsetDateTime,
    ) -> AuthResult<Option<u64>> {
        Ok(self
            .devices()
            .revoke_with_sessions(user_id, device_id, at)
            .await?)
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[async_trait]
impl SessionStorageTrait for PostgresAuthStorage {
    async fn create(&self, session: &Session) -> AuthResult<()> {
        self.sessions().create(session).await?;
        Ok(())
    }

    async fn create_with_device(
        &self,
        device: &Device,
        session: &Session,
    ) -> AuthResult<(Device, Session)> {
        let (row, session) = self.sessions().create_with_device(device, session).await?;
        Ok((row.into_device()?, session))
    }

    async fn find_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> AuthResult<Option<Session>> {
        match self.sessions().find_by_refresh_hash(refresh_token_hash).await? {
            Some(row) => Ok(Some(row.into_session()?)),
            None => Ok(None),
        }
    }

    async fn find_by_session_id(&self, session_id: &str) -> AuthResult<Option<Session>> {
        match self.sessions().find_by_session_id(session_id).await? {
            Some(row) => Ok(Some(row.into_session()?)),
            None => Ok(None),
        }
    }

    async fn rotate(
        &self,
        old_id: Uuid,
        successor: &Session,
        at: OffsetDateTime,
    ) -> AuthResult<bool> {
        Ok(self.sessions().rotate(old_id, successor, at).await?)
    }

    async fn revoke(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool> {
        Ok(self.sessions().revoke(session_id, at).await?)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<u64> {
        Ok(self.sessions().revoke_all_for_user(user_id, at).await?)
    }
}

// =============================================================================
// Consents
// =============================================================================

#[async_trait]
impl ConsentStorageTrait for PostgresAuthStorage {
    async fn record_consents(&self, records: &[ConsentRecord]) -> AuthResult<()> {
        self.consents().record(records).await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<ConsentRecord>> {
        let rows = self.consents().list_for_user(user_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_record())
            .collect::<Result<Vec<_>, _>>()?)
    }
}
