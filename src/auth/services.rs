use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, ChangePasswordRequest, PublicUser, SignupRequest, UpdateProfileRequest},
        jwt::JwtKeys,
        password::{hash_password, is_strong_password, verify_password, PASSWORD_RULE},
        repo_types::{NewUser, User},
    },
    error::{AppResult, Error},
    state::AppState,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= 255 && EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Six decimal digits, zero padded.
pub fn generate_verification_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
}

pub fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(Error::validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

fn check_new_password(password: &str, confirm: &str) -> AppResult<()> {
    if !is_strong_password(password) {
        return Err(Error::validation(PASSWORD_RULE));
    }
    if password != confirm {
        return Err(Error::validation("Passwords must match"));
    }
    Ok(())
}

fn check_profile_fields(first_name: &str, last_name: &str, username: &str) -> AppResult<()> {
    check_len("First name", first_name, 2, 80)?;
    check_len("Last name", last_name, 2, 80)?;
    check_len("Username", username, 3, 80)?;
    Ok(())
}

/// Trim and validate a signup form in place.
pub fn validate_signup(req: &mut SignupRequest) -> AppResult<()> {
    req.first_name = req.first_name.trim().to_string();
    req.last_name = req.last_name.trim().to_string();
    req.username = req.username.trim().to_string();
    req.email = normalize_email(&req.email);

    check_profile_fields(&req.first_name, &req.last_name, &req.username)?;
    if !is_valid_email(&req.email) {
        return Err(Error::validation("Invalid email"));
    }
    check_new_password(&req.password, &req.confirm)
}

fn conflict_from_unique(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or_default();
            let message = if constraint.contains("email") {
                "Email is already registered."
            } else if constraint.contains("username") {
                "Username is already taken."
            } else {
                "Account already exists."
            };
            return Error::Conflict {
                message: message.into(),
            };
        }
    }
    Error::Database(e)
}

pub fn issue_tokens(keys: &JwtKeys, user: &User) -> AppResult<AuthResponse> {
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

async fn send_code(st: &AppState, user: &User, code: &str) {
    let ttl = st.config.verification_ttl_minutes;
    if let Err(e) = st
        .mailer
        .send_verification_code(&user.email, &user.first_name, code, ttl)
        .await
    {
        warn!(error = %e, user_id = %user.id, "verification email not sent");
    }
}

pub async fn signup(st: &AppState, mut req: SignupRequest) -> AppResult<User> {
    validate_signup(&mut req)?;

    if User::find_by_email(&st.db, &req.email).await?.is_some() {
        return Err(Error::Conflict {
            message: "Email is already registered.".into(),
        });
    }
    if User::find_by_username(&st.db, &req.username).await?.is_some() {
        return Err(Error::Conflict {
            message: "Username is already taken.".into(),
        });
    }

    let hash = hash_password(&req.password)?;
    let code = generate_verification_code();
    let expires = OffsetDateTime::now_utc() + Duration::minutes(st.config.verification_ttl_minutes);

    let user = User::create(
        &st.db,
        &NewUser {
            first_name: &req.first_name,
            last_name: &req.last_name,
            username: &req.username,
            email: &req.email,
            password_hash: &hash,
            verification_code: &code,
            verification_expires_at: expires,
        },
    )
    .await
    .map_err(conflict_from_unique)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    send_code(st, &user, &code).await;
    Ok(user)
}

pub async fn resend_verification(st: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email);
    let Some(user) = User::find_by_email(&st.db, &email).await? else {
        info!("verification resend for unknown email");
        return Ok(());
    };
    if user.is_verified {
        return Ok(());
    }

    let code = generate_verification_code();
    let expires = OffsetDateTime::now_utc() + Duration::minutes(st.config.verification_ttl_minutes);
    User::set_verification_code(&st.db, user.id, &code, expires).await?;
    send_code(st, &user, &code).await;
    Ok(())
}

pub async fn verify_email(st: &AppState, email: &str, code: &str) -> AppResult<User> {
    let email = normalize_email(email);
    let code = code.trim();
    let now = OffsetDateTime::now_utc();

    let user = User::find_by_email(&st.db, &email)
        .await?
        .ok_or_else(|| Error::auth("Invalid verification code"))?;
    user.check_verification_code(code, now)?;

    let user = User::consume_verification_code(&st.db, user.id, code, now)
        .await?
        .ok_or_else(|| Error::auth("Invalid verification code"))?;
    info!(user_id = %user.id, "email verified");
    Ok(user)
}

pub async fn signin(st: &AppState, email: &str, password: &str) -> AppResult<User> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(Error::validation("Invalid email"));
    }

    let Some(user) = User::find_by_email(&st.db, &email).await? else {
        warn!(email = %email, "signin unknown email");
        return Err(Error::auth("Invalid email or password."));
    };
    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "signin invalid password");
        return Err(Error::auth("Invalid email or password."));
    }
    if !user.is_verified {
        return Err(Error::EmailNotVerified);
    }

    info!(user_id = %user.id, "user signed in");
    Ok(user)
}

/// Load a user that may hold tokens; unverified or missing accounts are rejected.
pub async fn active_user(st: &AppState, id: Uuid) -> AppResult<User> {
    let user = User::find_by_id(&st.db, id)
        .await?
        .ok_or_else(|| Error::auth("User not found"))?;
    if !user.is_verified {
        return Err(Error::EmailNotVerified);
    }
    Ok(user)
}

pub async fn forgot_password(st: &AppState, email: &str) -> AppResult<()> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(Error::validation("Invalid email"));
    }
    let Some(user) = User::find_by_email(&st.db, &email).await? else {
        info!("password reset for unknown email");
        return Ok(());
    };

    let token = generate_reset_token();
    let ttl = st.config.reset_ttl_minutes;
    User::set_reset_token(&st.db, user.id, &token, OffsetDateTime::now_utc() + Duration::minutes(ttl))
        .await?;
    if let Err(e) = st
        .mailer
        .send_password_reset(&user.email, &user.first_name, &token, ttl)
        .await
    {
        warn!(error = %e, user_id = %user.id, "password reset email not sent");
    }
    info!(user_id = %user.id, "password reset issued");
    Ok(())
}

pub async fn reset_password(
    st: &AppState,
    token: &str,
    password: &str,
    confirm: &str,
) -> AppResult<User> {
    let token = token.trim();
    let now = OffsetDateTime::now_utc();

    let user = User::find_by_reset_token(&st.db, token)
        .await?
        .ok_or_else(|| Error::auth("Invalid reset token"))?;
    user.check_reset_token(token, now)?;
    check_new_password(password, confirm)?;

    let hash = hash_password(password)?;
    let user = User::consume_reset_token(&st.db, token, &hash, now)
        .await?
        .ok_or_else(|| Error::auth("Invalid reset token"))?;
    info!(user_id = %user.id, "password reset");
    Ok(user)
}

pub async fn update_profile(
    st: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> AppResult<User> {
    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();
    let username = req.username.trim();
    check_profile_fields(first_name, last_name, username)?;

    if let Some(other) = User::find_by_username(&st.db, username).await? {
        if other.id != user_id {
            return Err(Error::Conflict {
                message: "Username is already taken.".into(),
            });
        }
    }

    let user = User::update_profile(&st.db, user_id, first_name, last_name, username)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => Error::auth("User not found"),
            other => conflict_from_unique(other),
        })?;
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> AppResult<()> {
    let user = User::find_by_id(&st.db, user_id)
        .await?
        .ok_or_else(|| Error::auth("User not found"))?;
    if !verify_password(&req.current_password, &user.password_hash)? {
        return Err(Error::auth("Current password is incorrect"));
    }
    check_new_password(&req.password, &req.confirm)?;

    let hash = hash_password(&req.password)?;
    User::update_password(&st.db, user_id, &hash).await?;
    info!(user_id = %user_id, "password changed");
    Ok(())
}
