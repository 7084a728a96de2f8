use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};

const USER_COLUMNS: &str = "id, first_name, last_name, username, email, password_hash, \
     is_verified, verification_code, verification_expires_at, reset_token, reset_expires_at, \
     created_at, updated_at";

impl User {
    /// Find a user by (lowercased) email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_username(db: &PgPool, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_reset_token(db: &PgPool, token: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1"
        ))
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Insert an unverified account. Unique violations surface as `sqlx::Error`.
    pub async fn create(db: &PgPool, new: &NewUser<'_>) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (first_name, last_name, username, email, password_hash,
                               verification_code, verification_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new.first_name)
        .bind(new.last_name)
        .bind(new.username)
        .bind(new.email)
        .bind(new.password_hash)
        .bind(new.verification_code)
        .bind(new.verification_expires_at)
        .fetch_one(db)
        .await
    }

    pub async fn set_verification_code(
        db: &PgPool,
        id: Uuid,
        code: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET verification_code = $2, verification_expires_at = $3, updated_at = now()
             WHERE id = $1 AND NOT is_verified
            "#,
        )
        .bind(id)
        .bind(code)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Mark verified and clear the code, only if the code still matches and is unexpired.
    /// Returns `None` when another request consumed it first.
    pub async fn consume_verification_code(
        db: &PgPool,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET is_verified = TRUE,
                   verification_code = NULL,
                   verification_expires_at = NULL,
                   updated_at = now()
             WHERE id = $1
               AND NOT is_verified
               AND verification_code = $2
               AND verification_expires_at > $3
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(code)
        .bind(now)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn set_reset_token(
        db: &PgPool,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET reset_token = $2, reset_expires_at = $3, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(db)
        .await?;
        Ok(())
    }

    /// Swap in a new password hash and clear the reset token in one statement.
    pub async fn consume_reset_token(
        db: &PgPool,
        token: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   reset_token = NULL,
                   reset_expires_at = NULL,
                   updated_at = now()
             WHERE reset_token = $1
               AND reset_expires_at > $3
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token)
        .bind(password_hash)
        .bind(now)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn update_profile(
        db: &PgPool,
        id: Uuid,
        first_name: &str,
        last_name: &str,
        username: &str,
    ) -> Result<User, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET first_name = $2, last_name = $3, username = $4, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(first_name)
        .bind(last_name)
        .bind(username)
        .fetch_one(db)
        .await
    }

    pub async fn update_password(db: &PgPool, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET password_hash = $2, reset_token = NULL, reset_expires_at = NULL,
                   updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(db)
        .await?;
        Ok(())
    }
}
