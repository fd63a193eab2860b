use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::AuthStore;
use crate::tokens::{self, IssuedToken, TokenCheck, TokenPurpose};
use crate::users::User;

use super::Session;

/// Create a session for a freshly authenticated user. A requested
/// remember-duration also mints a persistent selector/token pair scoped to
/// the user's current epoch.
pub async fn establish(
    store: &dyn AuthStore,
    user: &User,
    remember: Option<time::Duration>,
    now: OffsetDateTime,
) -> Result<(Session, Option<IssuedToken>), AuthError> {
    let expires_at = remember.map(|duration| now + duration);
    let session = store
        .create_session(user.id, user.session_epoch, expires_at)
        .await?;

    let remember_token = match remember {
        Some(duration) => Some(
            tokens::issue(
                store,
                user.id,
                TokenPurpose::RememberMe,
                user.session_epoch,
                duration,
                now,
            )
            .await?,
        ),
        None => None,
    };

    debug!(user_id = %user.id, session_id = %session.id, remembered = remember.is_some(), "session established");
    Ok((session, remember_token))
}

/// Authenticate from a remember-me pair. The stored token must match, be
/// unexpired, and carry the user's current session epoch; success mints a
/// fresh ephemeral session.
pub async fn resume(
    store: &dyn AuthStore,
    selector: &str,
    token: &str,
    now: OffsetDateTime,
) -> Result<(Session, User), AuthError> {
    let record = store.token_by_selector(selector).await?;
    let record = match tokens::check(record, token, TokenPurpose::RememberMe, now) {
        TokenCheck::Valid(record) => record,
        TokenCheck::Expired => return Err(AuthError::TokenExpired),
        TokenCheck::InvalidPair => return Err(AuthError::InvalidTokenPair),
    };

    let Some(user) = store.user_by_id(record.user_id).await? else {
        return Err(AuthError::InvalidTokenPair);
    };
    if record.epoch != user.session_epoch {
        // Issued before a "log out everywhere"; dead weight, drop it.
        store.delete_token(selector).await?;
        return Err(AuthError::InvalidTokenPair);
    }

    let session = store.create_session(user.id, user.session_epoch, None).await?;
    info!(user_id = %user.id, session_id = %session.id, "session resumed from remember token");
    Ok((session, user))
}

/// Resolve a presented session id to its user, enforcing expiry and epoch.
pub async fn current_user(
    store: &dyn AuthStore,
    session_id: Uuid,
    now: OffsetDateTime,
) -> Result<Option<(Session, User)>, AuthError> {
    let Some(session) = store.session_by_id(session_id).await? else {
        return Ok(None);
    };
    if session.is_expired(now) {
        store.delete_session(session_id).await?;
        return Ok(None);
    }
    let Some(user) = store.user_by_id(session.user_id).await? else {
        return Ok(None);
    };
    if session.epoch != user.session_epoch {
        store.delete_session(session_id).await?;
        return Ok(None);
    }
    Ok(Some((session, user)))
}

pub async fn destroy(store: &dyn AuthStore, session_id: Uuid) -> Result<(), AuthError> {
    store.delete_session(session_id).await?;
    Ok(())
}

/// Invalidate every session and remember token the user holds, on every
/// device, with one atomic epoch bump.
pub async fn logout_everywhere(store: &dyn AuthStore, user_id: Uuid) -> Result<i32, AuthError> {
    let epoch = store.bump_session_epoch(user_id).await?;
    info!(user_id = %user_id, epoch, "logged out everywhere");
    Ok(epoch)
}
