//! In-memory storage backend.
//!
//! Implements every storage trait over a single mutex-guarded state, so
//! multi-entity operations (user + consents, rotation, device cascade) are
//! atomic exactly like their database counterparts.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ConsentStorage, DeviceStorage, SessionStorage, UserStorage};
use crate::federation::AuthProvider;
use crate::types::{
    ConsentRecord, Device, DeviceStatus, LinkedIdentity, Session, SessionStatus, User,
};
use crate::{AuthError, AuthResult};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    devices: HashMap<Uuid, Device>,
    sessions: HashMap<Uuid, Session>,
    consents: Vec<ConsentRecord>,
}

impl State {
    fn owner_of(&self, provider: AuthProvider, subject_id: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| u.has_identity(provider, subject_id))
    }

    fn upsert_device(&mut self, device: &Device) -> Device {
        let existing = self.devices.values_mut().find(|d| {
            d.user_id == device.user_id && d.app_installation_id == device.app_installation_id
        });

        if let Some(existing) = existing {
            existing.platform = device.platform;
            existing.fingerprint.clone_from(&device.fingerprint);
            existing.app_version.clone_from(&device.app_version);
            existing.status = DeviceStatus::Active;
            existing.last_active_at = device.last_active_at;
            return existing.clone();
        }

        self.devices.insert(device.id, device.clone());
        device.clone()
    }

    fn insert_session(&mut self, session: &Session) -> AuthResult<()> {
        if self
            .sessions
            .values()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(AuthError::storage("duplicate refresh token hash"));
        }
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn revoke_session(session: &mut Session, at: OffsetDateTime) {
        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(at);
    }
}

/// Process-local storage for development and tests.
#[derive(Default)]
pub struct InMemoryAuthStorage {
    state: Mutex<State>,
}

impl InMemoryAuthStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    /// All sessions of a user, in no particular order.
    pub async fn sessions_for_user(&self, user_id: Uuid) -> Vec<Session> {
        self.state
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrites a user's account status.
    pub async fn set_account_status(
        &self,
        user_id: Uuid,
        status: crate::types::AccountStatus,
    ) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::user_not_found(user_id))?;
        user.account_status = status;
        Ok(())
    }
}

#[async_trait]
impl UserStorage for InMemoryAuthStorage {
    async fn find_by_id(&self, user_id: Uuid) -> AuthResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_by_provider_subject(
        &self,
        provider: AuthProvider,
        subject_id: &str,
    ) -> AuthResult<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .owner_of(provider, subject_id)
            .cloned())
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> AuthResult<Option<User>> {
        Ok(self
            .state
            .lock()
            .await
            .users
            .values()
            .find(|u| u.email_hash == email_hash)
            .cloned())
    }

    async fn create_with_consents(
        &self,
        user: &User,
        consents: &[ConsentRecord],
    ) -> AuthResult<()> {
        let mut state = self.state.lock().await;

        if state.users.contains_key(&user.id)
            || state.owner_of(user.auth_provider, &user.external_id).is_some()
        {
            return Err(AuthError::account_conflict(
                "provider identity is already registered",
            ));
        }
        if state.users.values().any(|u| u.email_hash == user.email_hash) {
            return Err(AuthError::account_conflict("email is already registered"));
        }

        state.users.insert(user.id, user.clone());
        state.consents.extend_from_slice(consents);
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        if let Some(user) = self.state.lock().await.users.get_mut(&user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn add_linked_identity(
        &self,
        user_id: Uuid,
        identity: &LinkedIdentity,
    ) -> AuthResult<bool> {
        let mut state = self.state.lock().await;

        if let Some(owner) = state.owner_of(identity.provider, &identity.subject_id) {
            if owner.id == user_id {
                return Ok(false);
            }
            return Err(AuthError::account_conflict(
                "provider identity belongs to another account",
            ));
        }

        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AuthError::user_not_found(user_id))?;
        Ok(user.add_linked_identity(identity.clone()))
    }
}

#[async_trait]
impl ConsentStorage for InMemoryAuthStorage {
    async fn record_consents(&self, records: &[ConsentRecord]) -> AuthResult<()> {
        self.state.lock().await.consents.extend_from_slice(records);
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> AuthResult<Vec<ConsentRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .consents
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeviceStorage for InMemoryAuthStorage {
    async fn upsert(&self, device: &Device) -> AuthResult<Device> {
        Ok(self.state.lock().await.upsert_device(device))
    }

    async fn find_by_id(&self, device_id: Uuid) -> AuthResult<Option<Device>> {
        Ok(self.state.lock().await.devices.get(&device_id).cloned())
    }

    async fn touch(&self, device_id: Uuid, at: OffsetDateTime) -> AuthResult<()> {
        if let Some(device) = self.state.lock().await.devices.get_mut(&device_id) {
            device.last_active_at = at;
        }
        Ok(())
    }

    async fn revoke_with_sessions(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        at: OffsetDateTime,
    ) -> AuthResult<Option<u64>> {
        let mut state = self.state.lock().await;

        match state.devices.get_mut(&device_id) {
            Some(device) if device.user_id == user_id => device.status = DeviceStatus::Revoked,
            _ => return Ok(None),
        }

        let mut revoked = 0;
        for session in state.sessions.values_mut().filter(|s| {
            s.device_id == Some(device_id) && s.status == SessionStatus::Active
        }) {
            State::revoke_session(session, at);
            revoked += 1;
        }
        Ok(Some(revoked))
    }
}

#[async_trait]
impl SessionStorage for InMemoryAuthStorage {
    async fn create(&self, session: &Session) -> AuthResult<()> {
        self.state.lock().await.insert_session(session)
    }

    async fn create_with_device(
        &self,
        device: &Device,
        session: &Session,
    ) -> AuthResult<(Device, Session)> {
        let mut state = self.state.lock().await;
        if state
            .sessions
            .values()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(AuthError::storage("duplicate refresh token hash"));
        }

        let device = state.upsert_device(device);
        let mut session = session.clone();
        session.device_id = Some(device.id);
        state.sessions.insert(session.id, session.clone());
        Ok((device, session))
    }

    async fn find_by_refresh_hash(
        &self,
        refresh_token_hash: &str,
    ) -> AuthResult<Option<Session>> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .values()
            .find(|s| s.refresh_token_hash == refresh_token_hash)
            .cloned())
    }

    async fn find_by_session_id(&self, session_id: &str) -> AuthResult<Option<Session>> {
        Ok(self
            .state
            .lock()
            .await
            .sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn rotate(
        &self,
        old_id: Uuid,
        successor: &Session,
        at: OffsetDateTime,
    ) -> AuthResult<bool> {
        let mut state = self.state.lock().await;

        match state.sessions.get_mut(&old_id) {
            Some(old) if old.status == SessionStatus::Active => State::revoke_session(old, at),
            _ => return Ok(false),
        }

        state.sessions.insert(successor.id, successor.clone());
        Ok(true)
    }

    async fn revoke(&self, session_id: &str, at: OffsetDateTime) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .sessions
            .values_mut()
            .find(|s| s.session_id == session_id && s.status == SessionStatus::Active)
        {
            Some(session) => {
                State::revoke_session(session, at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: OffsetDateTime) -> AuthResult<u64> {
        let mut state = self.state.lock().await;
        let mut revoked = 0;
        for session in state
            .sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && s.status == SessionStatus::Active)
        {
            State::revoke_session(session, at);
            revoked += 1;
        }
        Ok(revoked)
    }
}
