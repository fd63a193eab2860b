use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, LogoutResponse, PublicUser, RememberPair,
            SignupRequest, SignupResponse, VerifyResponse,
        },
        extractors::SessionAuth,
        services::{self, SignupInput, VerificationDispatch},
    },
    error::AuthError,
    mailer::VerificationMail,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/signup/verify/:selector/:token", get(verify))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

/// Best-effort client origin for throttle keying; the real address arrives
/// via proxy headers in any deployment this fronts.
fn client_origin(headers: &HeaderMap) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    "unknown".to_string()
}

fn verification_mail(base_url: &str, dispatch: &VerificationDispatch) -> VerificationMail {
    let link = format!(
        "{}/signup/verify/{}/{}",
        base_url.trim_end_matches('/'),
        dispatch.selector,
        dispatch.token
    );
    VerificationMail {
        to: dispatch.email.clone(),
        subject: "Confirm your email address".to_string(),
        link,
    }
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AuthError> {
    let origin = client_origin(&headers);
    let registration = services::register(
        &state,
        &origin,
        SignupInput {
            email: payload.email,
            username: payload.username,
            password: payload.password,
        },
    )
    .await?;

    // Fire-and-forget: a failed send never rolls back the created user.
    if let Some(dispatch) = &registration.verification {
        let mail = verification_mail(&state.config.base_url, dispatch);
        if let Err(e) = state.mailer.send(&mail) {
            error!(error = %e, to = %mail.to, "verification mail dispatch failed");
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user_id: registration.user_id,
            state: registration.state,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let origin = client_origin(&headers);
    let remember = payload
        .remember_days
        .filter(|days| *days > 0)
        .map(time::Duration::days);

    let authenticated = services::login(
        &state,
        &origin,
        &payload.identifier,
        payload.password,
        remember,
    )
    .await?;

    Ok(Json(LoginResponse {
        session_id: authenticated.session.id,
        session_expires_at: authenticated.session.expires_at,
        remember: authenticated.remember.map(|pair| RememberPair {
            selector: pair.selector,
            token: pair.token,
        }),
        user: PublicUser::from(&authenticated.user),
    }))
}

#[instrument(skip(state, auth))]
pub async fn logout(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<LogoutResponse>, AuthError> {
    services::logout(&state, auth.session.id).await?;
    Ok(Json(LogoutResponse {
        message: "logged out everywhere",
    }))
}

#[instrument(skip(state))]
pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((selector, token)): Path<(String, String)>,
) -> Result<Json<VerifyResponse>, AuthError> {
    let origin = client_origin(&headers);
    let confirmed = services::confirm_email(&state, &origin, &selector, &token).await?;
    Ok(Json(VerifyResponse {
        session_id: confirmed.session.id,
        user: PublicUser::from(&confirmed.user),
    }))
}

#[instrument(skip(auth))]
pub async fn get_me(auth: SessionAuth) -> Json<PublicUser> {
    Json(PublicUser::from(&auth.user))
}
