//! Registration, login, email-confirmation and logout workflows.
//!
//! Each workflow takes the acting context explicitly (request origin,
//! presented session) and returns a discriminated result for the caller to
//! render; nothing here touches transport concerns like cookies or mail.

use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::Role;
use crate::error::AuthError;
use crate::sessions::{services as sessions, Session};
use crate::state::AppState;
use crate::store::{IdentifierLookup, Redemption};
use crate::throttle::{ActionKind, Decision};
use crate::tokens::{self, IssuedToken, TokenCheck, TokenPurpose};
use crate::users::{services as users, NewUser, User};

#[derive(Debug, Clone)]
pub struct SignupInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    AwaitingVerification,
    Active,
}

/// Follow-up the caller must dispatch: send the confirmation link carrying
/// this selector/token pair to the address. The raw token exists only here.
#[derive(Debug)]
pub struct VerificationDispatch {
    pub email: String,
    pub selector: String,
    pub token: String,
}

#[derive(Debug)]
pub struct Registration {
    pub user_id: Uuid,
    pub state: RegistrationState,
    pub verification: Option<VerificationDispatch>,
}

#[derive(Debug)]
pub struct Authenticated {
    pub user: User,
    pub session: Session,
    pub remember: Option<IssuedToken>,
}

#[derive(Debug)]
pub struct Confirmed {
    pub user: User,
    pub session: Session,
}

fn retry_after(decision: Decision) -> Option<Duration> {
    match decision {
        Decision::Throttled { retry_after } => Some(retry_after),
        Decision::Allowed { .. } => None,
    }
}

/// Signup: validate locally, consult the throttle, create the credential
/// record, then either hand back a verification dispatch or activate
/// immediately depending on configuration.
pub async fn register(
    state: &AppState,
    origin: &str,
    input: SignupInput,
) -> Result<Registration, AuthError> {
    let email = users::normalize_email(&input.email);
    let username = users::normalize_username(&input.username);
    users::validate_email(&email)?;
    users::validate_username(&username)?;
    users::validate_password(&input.password)?;

    if let Some(wait) = retry_after(state.throttle.check_and_increment(origin, ActionKind::Signup))
    {
        warn!(origin, "signup throttled");
        return Err(AuthError::Throttled { retry_after: wait });
    }

    let password_hash = users::hash_password_blocking(input.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            email,
            username,
            password_hash,
        })
        .await?;
    state.store.add_role(user.id, Role::DEFAULT).await?;

    let now = OffsetDateTime::now_utc();
    if state.config.require_email_verification {
        let pair = tokens::issue(
            state.store.as_ref(),
            user.id,
            TokenPurpose::EmailConfirm,
            user.session_epoch,
            time::Duration::hours(state.config.tokens.confirm_ttl_hours),
            now,
        )
        .await?;
        info!(user_id = %user.id, email = %user.email, "user registered, awaiting verification");
        Ok(Registration {
            user_id: user.id,
            state: RegistrationState::AwaitingVerification,
            verification: Some(VerificationDispatch {
                email: user.email,
                selector: pair.selector,
                token: pair.token,
            }),
        })
    } else {
        state.store.set_verified(user.id).await?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(Registration {
            user_id: user.id,
            state: RegistrationState::Active,
            verification: None,
        })
    }
}

/// Login with username or email. Unknown identifier, ambiguous identifier
/// and wrong password are all the same `InvalidCredentials` to the caller;
/// the throttle has already recorded the attempt by then.
pub async fn login(
    state: &AppState,
    origin: &str,
    identifier: &str,
    password: String,
    remember: Option<time::Duration>,
) -> Result<Authenticated, AuthError> {
    let identifier_key = identifier.trim().to_lowercase();

    let by_origin = state.throttle.check_and_increment(origin, ActionKind::Login);
    let by_identifier = state
        .throttle
        .check_and_increment(&identifier_key, ActionKind::Login);
    let wait = [by_origin, by_identifier]
        .into_iter()
        .filter_map(retry_after)
        .max();
    if let Some(wait) = wait {
        warn!(origin, identifier = %identifier_key, "login throttled");
        return Err(AuthError::Throttled { retry_after: wait });
    }

    let user = match state.store.find_by_identifier(identifier).await? {
        IdentifierLookup::Found(user) => user,
        IdentifierLookup::NotFound => {
            warn!(origin, identifier = %identifier_key, "login with unknown identifier");
            return Err(AuthError::InvalidCredentials);
        }
        IdentifierLookup::Ambiguous => {
            warn!(origin, identifier = %identifier_key, "ambiguous login identifier");
            return Err(AuthError::InvalidCredentials);
        }
    };

    let ok = users::verify_password_blocking(password, user.password_hash.clone()).await?;
    if !ok {
        state.store.record_login_failure(user.id).await?;
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    if state.config.require_email_verification && !user.verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AuthError::EmailNotVerified);
    }

    let now = OffsetDateTime::now_utc();
    state.store.record_login_success(user.id, now).await?;
    state.throttle.reset(&identifier_key, ActionKind::Login);

    let remember = remember.map(|duration| {
        duration.min(time::Duration::days(state.config.sessions.max_remember_days))
    });
    let (session, remember_token) =
        sessions::establish(state.store.as_ref(), &user, remember, now).await?;
    info!(user_id = %user.id, session_id = %session.id, "user logged in");
    Ok(Authenticated {
        user,
        session,
        remember: remember_token,
    })
}

/// Confirm an email address from the mailed selector/token pair; success
/// implies login, since the pair already proved address ownership.
pub async fn confirm_email(
    state: &AppState,
    origin: &str,
    selector: &str,
    token: &str,
) -> Result<Confirmed, AuthError> {
    if let Some(wait) = retry_after(
        state
            .throttle
            .check_and_increment(origin, ActionKind::VerifyEmail),
    ) {
        warn!(origin, "verification throttled");
        return Err(AuthError::Throttled { retry_after: wait });
    }

    let now = OffsetDateTime::now_utc();
    let record = state.store.token_by_selector(selector).await?;
    let record = match tokens::check(record, token, TokenPurpose::EmailConfirm, now) {
        TokenCheck::Valid(record) => record,
        TokenCheck::InvalidPair => {
            warn!(origin, "invalid selector/token pair");
            return Err(AuthError::InvalidTokenPair);
        }
        TokenCheck::Expired => {
            state.store.delete_token(selector).await?;
            warn!(origin, "expired verification token");
            return Err(AuthError::TokenExpired);
        }
    };

    match state
        .store
        .redeem_email_confirmation(selector, &record.token_hash)
        .await?
    {
        Redemption::Redeemed(user) => {
            let (session, _) = sessions::establish(state.store.as_ref(), &user, None, now).await?;
            info!(user_id = %user.id, email = %user.email, "email verified and signed in");
            Ok(Confirmed { user, session })
        }
        Redemption::AlreadyVerified(user) => {
            warn!(user_id = %user.id, "stale verification link for verified account");
            Err(AuthError::AlreadyVerified)
        }
        // Lost a race with a concurrent redemption.
        Redemption::Gone => Err(AuthError::InvalidTokenPair),
    }
}

/// Log out of every device, then drop the presented session.
pub async fn logout(state: &AppState, session_id: Uuid) -> Result<(), AuthError> {
    if let Some(session) = state.store.session_by_id(session_id).await? {
        sessions::logout_everywhere(state.store.as_ref(), session.user_id).await?;
    }
    state.store.delete_session(session_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn test_state(require_verification: bool) -> AppState {
        let mut config = AppConfig::default();
        config.require_email_verification = require_verification;
        // Generous thresholds so only the throttle tests trip them.
        config.throttle.max_attempts = 100;
        AppState::in_memory(config)
    }

    fn alice() -> SignupInput {
        SignupInput {
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password: "Secret123".to_string(),
        }
    }

    #[tokio::test]
    async fn registration_validates_before_any_io() {
        let state = test_state(true);
        let bad_email = SignupInput {
            email: "not-an-email".to_string(),
            ..alice()
        };
        assert!(matches!(
            register(&state, "1.1.1.1", bad_email).await,
            Err(AuthError::InvalidEmail)
        ));
        let bad_password = SignupInput {
            password: "short".to_string(),
            ..alice()
        };
        assert!(matches!(
            register(&state, "1.1.1.1", bad_password).await,
            Err(AuthError::InvalidPassword(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_registrations_are_reported_verbatim() {
        let state = test_state(true);
        register(&state, "1.1.1.1", alice()).await.expect("first");

        let same_email = SignupInput {
            username: "alice2".to_string(),
            ..alice()
        };
        assert!(matches!(
            register(&state, "1.1.1.1", same_email).await,
            Err(AuthError::DuplicateEmail)
        ));

        let same_username = SignupInput {
            email: "alice2@example.com".to_string(),
            ..alice()
        };
        assert!(matches!(
            register(&state, "1.1.1.1", same_username).await,
            Err(AuthError::DuplicateUsername)
        ));
    }

    #[tokio::test]
    async fn registration_without_verification_is_immediately_active() {
        let state = test_state(false);
        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");
        assert_eq!(registration.state, RegistrationState::Active);
        assert!(registration.verification.is_none());

        let authenticated = login(&state, "1.1.1.1", "alice", "Secret123".to_string(), None)
            .await
            .expect("login");
        assert_eq!(authenticated.user.id, registration.user_id);
        assert!(authenticated.user.has_role(Role::Subscriber));
    }

    #[tokio::test]
    async fn end_to_end_verification_flow() {
        let state = test_state(true);

        // Register: verification required, so the workflow hands back a
        // dispatch instead of sending anything itself.
        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");
        assert_eq!(registration.state, RegistrationState::AwaitingVerification);
        let dispatch = registration.verification.expect("dispatch");
        assert_eq!(dispatch.email, "alice@example.com");

        // Login before confirmation is rejected with the distinct signal.
        assert!(matches!(
            login(&state, "1.1.1.1", "alice", "Secret123".to_string(), None).await,
            Err(AuthError::EmailNotVerified)
        ));

        // Confirm: verifies and signs in.
        let confirmed = confirm_email(&state, "1.1.1.1", &dispatch.selector, &dispatch.token)
            .await
            .expect("confirm");
        assert!(confirmed.user.verified);
        assert_eq!(confirmed.user.id, registration.user_id);
        assert!(sessions::current_user(
            state.store.as_ref(),
            confirmed.session.id,
            OffsetDateTime::now_utc()
        )
        .await
        .expect("session lookup")
        .is_some());

        // Replaying the link cannot re-authenticate.
        assert!(matches!(
            confirm_email(&state, "1.1.1.1", &dispatch.selector, &dispatch.token).await,
            Err(AuthError::InvalidTokenPair)
        ));

        // And a normal login now succeeds, by username or email.
        login(&state, "1.1.1.1", "alice", "Secret123".to_string(), None)
            .await
            .expect("login by username");
        login(
            &state,
            "1.1.1.1",
            "alice@example.com",
            "Secret123".to_string(),
            None,
        )
        .await
        .expect("login by email");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_indistinguishable() {
        let state = test_state(false);
        register(&state, "1.1.1.1", alice()).await.expect("register");

        let wrong_password = login(&state, "1.1.1.1", "alice", "WrongPass1".to_string(), None)
            .await
            .unwrap_err();
        let unknown_user = login(&state, "1.1.1.1", "mallory", "WrongPass1".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.code(), unknown_user.code());
    }

    #[tokio::test]
    async fn failed_logins_are_counted_and_cleared_on_success() {
        let state = test_state(false);
        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");

        for _ in 0..2 {
            let _ = login(&state, "1.1.1.1", "alice", "WrongPass1".to_string(), None).await;
        }
        let user = state
            .store
            .user_by_id(registration.user_id)
            .await
            .expect("lookup")
            .expect("user");
        assert_eq!(user.failed_logins, 2);

        login(&state, "1.1.1.1", "alice", "Secret123".to_string(), None)
            .await
            .expect("login");
        let user = state
            .store
            .user_by_id(registration.user_id)
            .await
            .expect("lookup")
            .expect("user");
        assert_eq!(user.failed_logins, 0);
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn login_throttles_on_identifier_and_origin() {
        let mut config = AppConfig::default();
        config.require_email_verification = false;
        config.throttle.max_attempts = 3;
        let state = AppState::in_memory(config);

        // Same identifier from rotating origins: the identifier counter
        // trips on the 4th attempt.
        for i in 0..3 {
            let origin = format!("10.0.0.{i}");
            let _ = login(&state, &origin, "alice", "WrongPass1".to_string(), None).await;
        }
        let err = login(&state, "10.0.0.9", "alice", "WrongPass1".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Throttled { .. }));

        // A different identifier from a fresh origin is unaffected.
        let err = login(&state, "10.0.1.1", "bob", "WrongPass1".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn remember_me_survives_login_and_dies_on_logout_everywhere() {
        let state = test_state(false);
        register(&state, "1.1.1.1", alice()).await.expect("register");

        let authenticated = login(
            &state,
            "1.1.1.1",
            "alice",
            "Secret123".to_string(),
            Some(time::Duration::days(14)),
        )
        .await
        .expect("login");
        let remember = authenticated.remember.expect("remember pair");
        let now = OffsetDateTime::now_utc();

        // The pair authenticates...
        sessions::resume(state.store.as_ref(), &remember.selector, &remember.token, now)
            .await
            .expect("resume");

        // ...until log out everywhere.
        logout(&state, authenticated.session.id)
            .await
            .expect("logout");
        assert!(matches!(
            sessions::resume(state.store.as_ref(), &remember.selector, &remember.token, now).await,
            Err(AuthError::InvalidTokenPair)
        ));
    }

    #[tokio::test]
    async fn remember_duration_is_capped() {
        let mut config = AppConfig::default();
        config.require_email_verification = false;
        config.throttle.max_attempts = 100;
        config.sessions.max_remember_days = 7;
        let state = AppState::in_memory(config);
        register(&state, "1.1.1.1", alice()).await.expect("register");

        let authenticated = login(
            &state,
            "1.1.1.1",
            "alice",
            "Secret123".to_string(),
            Some(time::Duration::days(365)),
        )
        .await
        .expect("login");
        let expires_at = authenticated.session.expires_at.expect("bounded session");
        let ceiling = OffsetDateTime::now_utc() + time::Duration::days(8);
        assert!(expires_at < ceiling);
    }

    #[tokio::test]
    async fn expired_confirmation_token_is_reported_and_removed() {
        let mut config = AppConfig::default();
        config.require_email_verification = true;
        config.throttle.max_attempts = 100;
        config.tokens.confirm_ttl_hours = -1; // already expired at issue
        let state = AppState::in_memory(config);

        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");
        let dispatch = registration.verification.expect("dispatch");

        assert!(matches!(
            confirm_email(&state, "1.1.1.1", &dispatch.selector, &dispatch.token).await,
            Err(AuthError::TokenExpired)
        ));
        // Treated as gone afterwards.
        assert!(matches!(
            confirm_email(&state, "1.1.1.1", &dispatch.selector, &dispatch.token).await,
            Err(AuthError::InvalidTokenPair)
        ));
    }

    #[tokio::test]
    async fn reissued_confirmation_token_invalidates_the_previous_one() {
        let state = test_state(true);
        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");
        let first = registration.verification.expect("dispatch");

        // Re-send: issue a fresh token for the same user and purpose.
        let second = tokens::issue(
            state.store.as_ref(),
            registration.user_id,
            TokenPurpose::EmailConfirm,
            0,
            time::Duration::hours(24),
            OffsetDateTime::now_utc(),
        )
        .await
        .expect("reissue");

        assert!(matches!(
            confirm_email(&state, "1.1.1.1", &first.selector, &first.token).await,
            Err(AuthError::InvalidTokenPair)
        ));
        confirm_email(&state, "1.1.1.1", &second.selector, &second.token)
            .await
            .expect("confirm with reissued token");
    }

    #[tokio::test]
    async fn stale_link_after_verification_reports_already_verified() {
        let state = test_state(true);
        let registration = register(&state, "1.1.1.1", alice()).await.expect("register");
        let dispatch = registration.verification.expect("dispatch");

        confirm_email(&state, "1.1.1.1", &dispatch.selector, &dispatch.token)
            .await
            .expect("confirm");

        // A second outstanding token (e.g. from a duplicate re-send request
        // racing the confirmation) now hits an already-verified account.
        let stale = tokens::issue(
            state.store.as_ref(),
            registration.user_id,
            TokenPurpose::EmailConfirm,
            0,
            time::Duration::hours(24),
            OffsetDateTime::now_utc(),
        )
        .await
        .expect("stale token");
        assert!(matches!(
            confirm_email(&state, "1.1.1.1", &stale.selector, &stale.token).await,
            Err(AuthError::AlreadyVerified)
        ));
    }
}
