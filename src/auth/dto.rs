use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::services::RegistrationState;
use crate::users::User;

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Request body for login; `identifier` is a username or an email address.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    /// Requested remember-me duration; omitted means an ephemeral session.
    pub remember_days: Option<i64>,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub verified: bool,
    pub roles: Vec<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            verified: user.verified,
            roles: user.roles().iter().map(|r| r.as_str().to_string()).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user_id: Uuid,
    pub state: RegistrationState,
}

/// Remember-me pair for the client to persist; the token is shown exactly
/// once and only its hash is stored server-side.
#[derive(Debug, Serialize)]
pub struct RememberPair {
    pub selector: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_expires_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remember: Option<RememberPair>,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub session_id: Uuid,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use time::OffsetDateTime;

    #[test]
    fn public_user_hides_the_password_hash() {
        let user = User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            verified: true,
            roles_mask: Role::Subscriber.bit() | Role::Admin.bit(),
            failed_logins: 0,
            session_epoch: 0,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        let json = serde_json::to_string(&PublicUser::from(&user)).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(json.contains("subscriber"));
        assert!(json.contains("admin"));
        assert!(!json.contains("argon2id"));
    }
}
