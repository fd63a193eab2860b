use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Discriminated outcomes of the authentication workflows.
///
/// Everything except `Store` is an expected result the caller renders into
/// user feedback; `Store` is the one unexpected path and maps to a 5xx.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("invalid username: {0}")]
    InvalidUsername(&'static str),
    #[error("password rejected: {0}")]
    InvalidPassword(&'static str),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("too many attempts, retry after {}s", retry_after.as_secs())]
    Throttled { retry_after: Duration },
    // Deliberately generic: covers unknown identifier, ambiguous identifier
    // and wrong password so callers cannot enumerate accounts.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email address not verified")]
    EmailNotVerified,
    #[error("invalid selector/token pair")]
    InvalidTokenPair,
    #[error("verification token expired")]
    TokenExpired,
    #[error("email address already verified")]
    AlreadyVerified,
    #[error("insufficient privileges")]
    Forbidden,
    #[error("password hashing failed")]
    Hashing,
    #[error("storage failure")]
    Store(#[source] StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::DuplicateUsername => AuthError::DuplicateUsername,
            other => AuthError::Store(other),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidEmail
            | AuthError::InvalidUsername(_)
            | AuthError::InvalidPassword(_)
            | AuthError::InvalidTokenPair
            | AuthError::TokenExpired => StatusCode::BAD_REQUEST,
            AuthError::DuplicateEmail
            | AuthError::DuplicateUsername
            | AuthError::AlreadyVerified => StatusCode::CONFLICT,
            AuthError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::InvalidCredentials | AuthError::EmailNotVerified => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Hashing | AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for audit logging and client handling.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "invalid_email",
            AuthError::InvalidUsername(_) => "invalid_username",
            AuthError::InvalidPassword(_) => "invalid_password",
            AuthError::DuplicateEmail => "duplicate_email",
            AuthError::DuplicateUsername => "duplicate_username",
            AuthError::Throttled { .. } => "throttled",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailNotVerified => "email_not_verified",
            AuthError::InvalidTokenPair => "invalid_token_pair",
            AuthError::TokenExpired => "token_expired",
            AuthError::AlreadyVerified => "already_verified",
            AuthError::Forbidden => "forbidden",
            AuthError::Hashing => "internal_error",
            AuthError::Store(_) => "internal_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Store(ref e) = self {
            error!(error = %e, "storage failure");
        }
        let retry_after = match &self {
            AuthError::Throttled { retry_after } => Some(retry_after.as_secs()),
            _ => None,
        };
        // Internal details stay out of the response body.
        let message = match &self {
            AuthError::Store(_) | AuthError::Hashing => "internal error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.code(),
            message,
            retry_after_secs: retry_after,
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_duplicates_map_to_conflict_variants() {
        assert!(matches!(
            AuthError::from(StoreError::DuplicateEmail),
            AuthError::DuplicateEmail
        ));
        assert!(matches!(
            AuthError::from(StoreError::DuplicateUsername),
            AuthError::DuplicateUsername
        ));
        assert!(matches!(
            AuthError::from(StoreError::NotFound),
            AuthError::Store(StoreError::NotFound)
        ));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AuthError::InvalidEmail.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::DuplicateEmail.status(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::Throttled {
                retry_after: Duration::from_secs(30)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Store(StoreError::NotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
