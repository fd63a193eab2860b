use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// An authenticated browser/device.
///
/// `expires_at = None` is an ephemeral session that ends with the client's
/// own session lifetime; a remember-duration bound session carries its
/// absolute expiry. `epoch` must match the owning user's `session_epoch`
/// for the session to validate.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub epoch: i32,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl Session {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
