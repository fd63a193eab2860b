//! Storage contract for users, tokens and sessions.
//!
//! The engine talks to storage through [`AuthStore`] so the workflows can
//! run against Postgres in production and the in-memory store in tests.
//! Implementations guarantee the three serialization points the workflows
//! rely on: atomic check-and-insert for user uniqueness, single-shot token
//! redemption, and an atomic session-epoch bump.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::Role;
use crate::sessions::Session;
use crate::tokens::TokenRecord;
use crate::users::{NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of resolving a login identifier that may be a username or an
/// email address.
#[derive(Debug)]
pub enum IdentifierLookup {
    Found(User),
    NotFound,
    /// The same string matched one account's username and a different
    /// account's email; refusing to guess beats authenticating the wrong
    /// account.
    Ambiguous,
}

/// Outcome of atomically consuming an email-confirmation token.
#[derive(Debug)]
pub enum Redemption {
    /// Token consumed, user flipped to verified; carries the updated user.
    Redeemed(User),
    /// Token was valid but the account is already verified (stale link
    /// after a re-send); the token is consumed without re-verifying.
    AlreadyVerified(User),
    /// No matching unconsumed token; replayed or lost a race.
    Gone,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // -- users ----------------------------------------------------------

    /// Atomic check-and-insert; both uniqueness constraints are enforced in
    /// the same operation, so concurrent duplicates cannot both succeed.
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive lookup by username or email.
    async fn find_by_identifier(&self, identifier: &str)
        -> Result<IdentifierLookup, StoreError>;

    async fn set_verified(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Idempotent role grant (bitmask OR).
    async fn add_role(&self, user_id: Uuid, role: Role) -> Result<(), StoreError>;

    async fn record_login_success(
        &self,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), StoreError>;

    // -- tokens ---------------------------------------------------------

    /// Persist a token record; when `replace_for_user` is set, any prior
    /// record with the same user and purpose is removed in the same
    /// operation (one outstanding verification token per user).
    async fn put_token(&self, record: TokenRecord, replace_for_user: bool)
        -> Result<(), StoreError>;

    async fn token_by_selector(&self, selector: &str)
        -> Result<Option<TokenRecord>, StoreError>;

    /// Consume an email-confirmation token and mark its user verified in
    /// one transaction. Two concurrent redemptions of the same pair yield
    /// one `Redeemed` and one `Gone`.
    async fn redeem_email_confirmation(
        &self,
        selector: &str,
        token_hash: &[u8],
    ) -> Result<Redemption, StoreError>;

    async fn delete_token(&self, selector: &str) -> Result<(), StoreError>;

    /// Expiry sweep; returns the number of reclaimed records.
    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, StoreError>;

    // -- sessions -------------------------------------------------------

    async fn create_session(
        &self,
        user_id: Uuid,
        epoch: i32,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Session, StoreError>;

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError>;

    /// "Log out everywhere": atomically bump the user's session epoch and
    /// prune stored sessions and remember tokens. Returns the new epoch.
    async fn bump_session_epoch(&self, user_id: Uuid) -> Result<i32, StoreError>;
}
