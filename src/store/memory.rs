//! In-memory [`AuthStore`] used by the test suite and local development.
//!
//! Every operation takes the single table lock once, which is what makes
//! check-and-insert and token redemption atomic here.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::Role;
use crate::sessions::Session;
use crate::tokens::{TokenPurpose, TokenRecord};
use crate::users::{NewUser, User};

use super::{AuthStore, IdentifierLookup, Redemption, StoreError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// Normalized (lowercased) email -> user id.
    email_idx: HashMap<String, Uuid>,
    /// Normalized (lowercased) username -> user id.
    username_idx: HashMap<String, Uuid>,
    tokens: HashMap<String, TokenRecord>,
    sessions: HashMap<Uuid, Session>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let email_key = new.email.to_lowercase();
        let username_key = new.username.to_lowercase();
        if tables.email_idx.contains_key(&email_key) {
            return Err(StoreError::DuplicateEmail);
        }
        if tables.username_idx.contains_key(&username_key) {
            return Err(StoreError::DuplicateUsername);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            verified: false,
            roles_mask: 0,
            failed_logins: 0,
            session_epoch: 0,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        tables.email_idx.insert(email_key, user.id);
        tables.username_idx.insert(username_key, user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables.users.get(&id).cloned())
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<IdentifierLookup, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        let key = identifier.trim().to_lowercase();
        let by_username = tables.username_idx.get(&key).copied();
        let by_email = tables.email_idx.get(&key).copied();
        Ok(match (by_username, by_email) {
            (Some(a), Some(b)) if a != b => IdentifierLookup::Ambiguous,
            (Some(id), _) | (_, Some(id)) => match tables.users.get(&id) {
                Some(user) => IdentifierLookup::Found(user.clone()),
                None => IdentifierLookup::NotFound,
            },
            (None, None) => IdentifierLookup::NotFound,
        })
    }

    async fn set_verified(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.verified = true;
        Ok(())
    }

    async fn add_role(&self, user_id: Uuid, role: Role) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.roles_mask |= role.bit();
        Ok(())
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.failed_logins = 0;
        user.last_login = Some(at);
        Ok(())
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.failed_logins = user.failed_logins.saturating_add(1);
        Ok(())
    }

    async fn put_token(
        &self,
        record: TokenRecord,
        replace_for_user: bool,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        if replace_for_user {
            tables.tokens.retain(|_, existing| {
                !(existing.user_id == record.user_id && existing.purpose == record.purpose)
            });
        }
        tables.tokens.insert(record.selector.clone(), record);
        Ok(())
    }

    async fn token_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables.tokens.get(selector).cloned())
    }

    async fn redeem_email_confirmation(
        &self,
        selector: &str,
        token_hash: &[u8],
    ) -> Result<Redemption, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let matches = tables.tokens.get(selector).is_some_and(|record| {
            record.purpose == TokenPurpose::EmailConfirm && record.token_hash == token_hash
        });
        if !matches {
            return Ok(Redemption::Gone);
        }
        let record = tables
            .tokens
            .remove(selector)
            .ok_or(StoreError::NotFound)?;
        let user = tables
            .users
            .get_mut(&record.user_id)
            .ok_or(StoreError::NotFound)?;
        if user.verified {
            return Ok(Redemption::AlreadyVerified(user.clone()));
        }
        user.verified = true;
        Ok(Redemption::Redeemed(user.clone()))
    }

    async fn delete_token(&self, selector: &str) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        tables.tokens.remove(selector);
        Ok(())
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let before = tables.tokens.len();
        tables.tokens.retain(|_, record| record.expires_at > now);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        epoch: i32,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Session, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            epoch,
            created_at: OffsetDateTime::now_utc(),
            expires_at,
        };
        tables.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let tables = self.inner.lock().expect("store mutex poisoned");
        Ok(tables.sessions.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        tables.sessions.remove(&id);
        Ok(())
    }

    async fn bump_session_epoch(&self, user_id: Uuid) -> Result<i32, StoreError> {
        let mut tables = self.inner.lock().expect("store mutex poisoned");
        let epoch = {
            let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
            user.session_epoch += 1;
            user.session_epoch
        };
        tables.sessions.retain(|_, session| session.user_id != user_id);
        tables.tokens.retain(|_, record| {
            !(record.user_id == user_id && record.purpose == TokenPurpose::RememberMe)
        });
        Ok(epoch)
    }
}
