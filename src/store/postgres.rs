//! Postgres-backed [`AuthStore`].
//!
//! Uniqueness rides on the named unique indexes from the migration
//! (`users_email_unique`, `users_username_unique`); token redemption and the
//! epoch bump run in transactions so their check-and-mutate steps cannot
//! interleave with a concurrent request.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::access::Role;
use crate::sessions::Session;
use crate::tokens::{TokenPurpose, TokenRecord};
use crate::users::{NewUser, User};

use super::{AuthStore, IdentifierLookup, Redemption, StoreError};

const USER_COLUMNS: &str = "id, email, username, password_hash, verified, roles_mask, \
                            failed_logins, session_epoch, created_at, last_login";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.constraint() {
            Some("users_email_unique") => return StoreError::DuplicateEmail,
            Some("users_username_unique") => return StoreError::DuplicateUsername,
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn token_from_row(row: &PgRow) -> Result<TokenRecord, StoreError> {
    let purpose_str: String = row.try_get("purpose")?;
    let purpose = TokenPurpose::parse(&purpose_str).ok_or_else(|| {
        StoreError::Database(sqlx::Error::ColumnDecode {
            index: "purpose".to_string(),
            source: format!("unknown token purpose: {purpose_str}").into(),
        })
    })?;
    Ok(TokenRecord {
        selector: row.try_get("selector")?,
        token_hash: row.try_get("token_hash")?,
        purpose,
        user_id: row.try_get("user_id")?,
        epoch: row.try_get("epoch")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuthStore for PgStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(&new.email)
        .bind(&new.username)
        .bind(&new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<IdentifierLookup, StoreError> {
        let key = identifier.trim().to_lowercase();
        let rows = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE LOWER(username) = $1 OR LOWER(email) = $1
            "#,
        ))
        .bind(&key)
        .fetch_all(&self.pool)
        .await?;

        let mut users = rows.into_iter();
        Ok(match users.next() {
            None => IdentifierLookup::NotFound,
            Some(user) => {
                if users.any(|other| other.id != user.id) {
                    IdentifierLookup::Ambiguous
                } else {
                    IdentifierLookup::Found(user)
                }
            }
        })
    }

    async fn set_verified(&self, user_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET verified = TRUE WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_role(&self, user_id: Uuid, role: Role) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET roles_mask = roles_mask | $2 WHERE id = $1")
            .bind(user_id)
            .bind(role.bit())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET failed_logins = 0, last_login = $2 WHERE id = $1")
                .bind(user_id)
                .bind(at)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE users SET failed_logins = failed_logins + 1 WHERE id = $1")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn put_token(
        &self,
        record: TokenRecord,
        replace_for_user: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        if replace_for_user {
            sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND purpose = $2")
                .bind(record.user_id)
                .bind(record.purpose.as_str())
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (selector, token_hash, purpose, user_id, epoch, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.selector)
        .bind(&record.token_hash)
        .bind(record.purpose.as_str())
        .bind(record.user_id)
        .bind(record.epoch)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn token_by_selector(
        &self,
        selector: &str,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT selector, token_hash, purpose, user_id, epoch, expires_at, created_at
            FROM auth_tokens
            WHERE selector = $1
            "#,
        )
        .bind(selector)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn redeem_email_confirmation(
        &self,
        selector: &str,
        token_hash: &[u8],
    ) -> Result<Redemption, StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM auth_tokens
            WHERE selector = $1 AND token_hash = $2 AND purpose = 'email_confirm'
            RETURNING user_id
            "#,
        )
        .bind(selector)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = deleted else {
            tx.rollback().await?;
            return Ok(Redemption::Gone);
        };
        let user_id: Uuid = row.try_get("user_id")?;

        let updated = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET verified = TRUE
            WHERE id = $1 AND verified = FALSE
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        match updated {
            Some(user) => {
                tx.commit().await?;
                Ok(Redemption::Redeemed(user))
            }
            None => {
                // Already verified: consume the stale token all the same.
                let user = sqlx::query_as::<_, User>(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
                ))
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(match user {
                    Some(user) => Redemption::AlreadyVerified(user),
                    None => Redemption::Gone,
                })
            }
        }
    }

    async fn delete_token(&self, selector: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_tokens WHERE selector = $1")
            .bind(selector)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_tokens(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        epoch: i32,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (user_id, epoch, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, epoch, created_at, expires_at
            "#,
        )
        .bind(user_id)
        .bind(epoch)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, epoch, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bump_session_epoch(&self, user_id: Uuid) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            UPDATE users SET session_epoch = session_epoch + 1
            WHERE id = $1
            RETURNING session_epoch
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound);
        };
        let epoch: i32 = row.try_get("session_epoch")?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1 AND purpose = 'remember_me'")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(epoch)
    }
}
