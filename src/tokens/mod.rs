//! Opaque selector/token pairs for email verification and remember-me.
//!
//! The selector is a public lookup key; the token is the secret. Only a
//! SHA-256 hash of the token is persisted, so a raw token can be handed out
//! exactly once and never recovered later, only re-issued.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{AuthStore, StoreError};

pub const SELECTOR_BYTES: usize = 16;
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailConfirm,
    RememberMe,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::EmailConfirm => "email_confirm",
            TokenPurpose::RememberMe => "remember_me",
        }
    }

    pub fn parse(value: &str) -> Option<TokenPurpose> {
        match value {
            "email_confirm" => Some(TokenPurpose::EmailConfirm),
            "remember_me" => Some(TokenPurpose::RememberMe),
            _ => None,
        }
    }

    /// At most one outstanding email-confirmation token per user; remember
    /// tokens accumulate, one per trusted device.
    pub fn single_per_user(self) -> bool {
        matches!(self, TokenPurpose::EmailConfirm)
    }
}

/// The raw pair as handed to the caller. The token field is the only copy
/// of the secret that will ever exist.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub selector: String,
    pub token: String,
}

/// Persisted form; note the hash, never the token itself.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub selector: String,
    pub token_hash: Vec<u8>,
    pub purpose: TokenPurpose,
    pub user_id: Uuid,
    pub epoch: i32,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

pub fn generate_pair() -> IssuedToken {
    let mut selector = [0u8; SELECTOR_BYTES];
    OsRng.fill_bytes(&mut selector);
    let mut token = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut token);
    IssuedToken {
        selector: Base64UrlUnpadded::encode_string(&selector),
        token: Base64UrlUnpadded::encode_string(&token),
    }
}

pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Constant-time comparison of the supplied token against the stored hash.
pub fn token_matches(token: &str, stored_hash: &[u8]) -> bool {
    hash_token(token).ct_eq(stored_hash).into()
}

/// Generate a pair and persist its record in one step. Returns the raw pair.
pub async fn issue(
    store: &dyn AuthStore,
    user_id: Uuid,
    purpose: TokenPurpose,
    epoch: i32,
    ttl: time::Duration,
    now: OffsetDateTime,
) -> Result<IssuedToken, StoreError> {
    let pair = generate_pair();
    let record = TokenRecord {
        selector: pair.selector.clone(),
        token_hash: hash_token(&pair.token),
        purpose,
        user_id,
        epoch,
        expires_at: now + ttl,
        created_at: now,
    };
    store.put_token(record, purpose.single_per_user()).await?;
    Ok(pair)
}

#[derive(Debug)]
pub enum TokenCheck {
    Valid(TokenRecord),
    /// Absent selector, purpose mismatch or wrong token; indistinguishable
    /// to the caller by design.
    InvalidPair,
    Expired,
}

/// Validate a looked-up record against the supplied secret. Expiry is only
/// reported for an otherwise correct pair so the distinct signal leaks
/// nothing to guessing callers.
pub fn check(
    record: Option<TokenRecord>,
    token: &str,
    purpose: TokenPurpose,
    now: OffsetDateTime,
) -> TokenCheck {
    let Some(record) = record else {
        return TokenCheck::InvalidPair;
    };
    if record.purpose != purpose {
        return TokenCheck::InvalidPair;
    }
    if !token_matches(token, &record.token_hash) {
        return TokenCheck::InvalidPair;
    }
    if record.expires_at <= now {
        return TokenCheck::Expired;
    }
    TokenCheck::Valid(record)
}
