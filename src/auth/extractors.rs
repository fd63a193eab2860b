use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::sessions::{services as sessions, Session};
use crate::state::AppState;
use crate::users::User;

/// Extracts and validates the presented session, resolving its user.
///
/// The session id travels as a bearer credential; cookie handling is the
/// host application's concern.
pub struct SessionAuth {
    pub session: Session,
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for SessionAuth {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".into()))?;

        let session_id = Uuid::parse_str(token.trim())
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid session id".into()))?;

        match sessions::current_user(
            state.store.as_ref(),
            session_id,
            OffsetDateTime::now_utc(),
        )
        .await
        {
            Ok(Some((session, user))) => Ok(SessionAuth { session, user }),
            Ok(None) => Err((
                StatusCode::UNAUTHORIZED,
                "invalid or expired session".into(),
            )),
            Err(e) => {
                error!(error = %e, "session lookup failed");
                Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "session lookup failed".into(),
                ))
            }
        }
    }
}
