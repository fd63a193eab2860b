use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::{Role, RoleSet};

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub verified: bool,
    pub roles_mask: i32,
    pub failed_logins: i32,
    /// Bumped on "log out everywhere"; sessions and remember tokens carry
    /// the epoch they were issued under and die when it moves on.
    pub session_epoch: i32,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

impl User {
    pub fn roles(&self) -> RoleSet {
        RoleSet::from_mask(self.roles_mask)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles().contains(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles().contains_any(roles)
    }
}

/// Input for an atomic check-and-insert; email and username are already
/// normalized and validated, the password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}
