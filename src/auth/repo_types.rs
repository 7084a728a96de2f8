use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Error;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,                // stored lowercase
    pub password_hash: String,        // Argon2 PHC string
    pub is_verified: bool,
    pub verification_code: Option<String>,
    pub verification_expires_at: Option<OffsetDateTime>,
    pub reset_token: Option<String>,
    pub reset_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields needed to insert a fresh, unverified account.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub verification_code: &'a str,
    pub verification_expires_at: OffsetDateTime,
}

fn check_single_use(
    stored: Option<&str>,
    expires_at: Option<OffsetDateTime>,
    presented: &str,
    now: OffsetDateTime,
    what: &str,
) -> Result<(), Error> {
    match (stored, expires_at) {
        (Some(s), Some(exp)) if s == presented => {
            if exp > now {
                Ok(())
            } else {
                Err(Error::auth(format!("{what} has expired")))
            }
        }
        _ => Err(Error::auth(format!("Invalid {what}"))),
    }
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Whether `code` would verify this account at `now`.
    pub fn check_verification_code(&self, code: &str, now: OffsetDateTime) -> Result<(), Error> {
        if self.is_verified {
            return Err(Error::auth("Account is already verified"));
        }
        check_single_use(
            self.verification_code.as_deref(),
            self.verification_expires_at,
            code.trim(),
            now,
            "verification code",
        )
    }

    pub fn check_reset_token(&self, token: &str, now: OffsetDateTime) -> Result<(), Error> {
        check_single_use(
            self.reset_token.as_deref(),
            self.reset_expires_at,
            token.trim(),
            now,
            "reset token",
        )
    }
}

#[cfg(test)]
pub(crate) fn user_fixture() -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        username: "ada".into(),
        email: "ada@example.com".into(),
        password_hash: String::new(),
        is_verified: false,
        verification_code: None,
        verification_expires_at: None,
        reset_token: None,
        reset_expires_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn verification_code_must_match_and_be_fresh() {
        let now = OffsetDateTime::now_utc();
        let mut user = user_fixture();
        user.verification_code = Some("123456".into());
        user.verification_expires_at = Some(now + Duration::minutes(15));

        assert!(user.check_verification_code("123456", now).is_ok());
        assert!(user.check_verification_code(" 123456 ", now).is_ok());
        assert!(user.check_verification_code("654321", now).is_err());

        let later = now + Duration::minutes(16);
        let err = user.check_verification_code("123456", later).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn consumed_code_no_longer_verifies() {
        let now = OffsetDateTime::now_utc();
        let mut user = user_fixture();
        // state after a successful verification
        user.is_verified = true;
        user.verification_code = None;
        user.verification_expires_at = None;
        assert!(user.check_verification_code("123456", now).is_err());

        user.is_verified = false;
        assert!(user.check_verification_code("123456", now).is_err());
    }

    #[test]
    fn reset_token_is_single_use() {
        let now = OffsetDateTime::now_utc();
        let mut user = user_fixture();
        user.reset_token = Some("tok".into());
        user.reset_expires_at = Some(now + Duration::minutes(15));
        assert!(user.check_reset_token("tok", now).is_ok());

        user.reset_token = None;
        user.reset_expires_at = None;
        assert!(user.check_reset_token("tok", now).is_err());
    }

    #[test]
    fn full_name_joins_names() {
        assert_eq!(user_fixture().full_name(), "Ada Lovelace");
    }
}
