use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    analyses::repo as analyses_repo,
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, EmailRequest, GuestResponse, MessageResponse,
            ProfileResponse, PublicUser, RefreshRequest, ResetPasswordRequest, SigninRequest,
            SignupRequest, SignupResponse, UpdateProfileRequest, VerifyRequest,
        },
        extractors::{AuthUser, Caller, GuestSessionId},
        jwt::JwtKeys,
        services,
    },
    error::{AppResult, Error},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify", post(verify))
        .route("/auth/verify/resend", post(resend_verification))
        .route("/auth/signin", post(signin))
        .route("/auth/refresh", post(refresh))
        .route("/auth/signout", post(signout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/guest", post(guest))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).put(update_me))
        .route("/me/password", put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let user = services::signup(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: PublicUser::from(&user),
            message: "Account created. Check your email for a verification code.".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = services::verify_email(&state, &payload.email, &payload.code).await?;
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(services::issue_tokens(&keys, &user)?))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    services::resend_verification(&state, &payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If an unverified account exists, a new code is on its way.",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn signin(
    State(state): State<AppState>,
    Json(payload): Json<SigninRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = services::signin(&state, &payload.email, &payload.password).await?;
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(services::issue_tokens(&keys, &user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| Error::auth("Invalid or expired refresh token"))?;
    let user = services::active_user(&state, claims.sub).await?;
    Ok(Json(services::issue_tokens(&keys, &user)?))
}

/// Tokens are stateless; the client drops them.
#[instrument(skip_all)]
pub async fn signout(caller: Caller) -> Json<MessageResponse> {
    match caller {
        Caller::User(id) => info!(user_id = %id, "user signed out"),
        Caller::Guest(g) => info!(guest = %g, "guest signed out"),
    }
    Json(MessageResponse::new("Signed out."))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    services::forgot_password(&state, &payload.email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If an account exists, you'll receive reset instructions shortly.",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::reset_password(&state, &payload.token, &payload.password, &payload.confirm).await?;
    Ok(Json(MessageResponse::new(
        "Password updated. You can now sign in.",
    )))
}

#[instrument(skip(state))]
pub async fn guest(State(state): State<AppState>) -> AppResult<Json<GuestResponse>> {
    let session = Uuid::new_v4();
    let keys = JwtKeys::from_ref(&state);
    let guest_token = keys.sign_guest(session)?;
    let id = GuestSessionId::from(session);
    info!(guest = %id, "guest session started");
    Ok(Json(GuestResponse {
        guest_token,
        guest_session_id: id.to_string(),
        quota: state.config.guest_quota,
        message: "You are browsing as Guest. Sign up to keep your history across devices.".into(),
    }))
}

async fn profile(state: &AppState, user: &crate::auth::repo_types::User) -> AppResult<ProfileResponse> {
    let analyses_count = analyses_repo::count_for_user(&state.db, user.id).await?;
    Ok(ProfileResponse {
        user: PublicUser::from(user),
        analyses_count,
    })
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ProfileResponse>> {
    let user = services::active_user(&state, user_id).await?;
    Ok(Json(profile(&state, &user).await?))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<ProfileResponse>> {
    let user = services::update_profile(&state, user_id, payload).await?;
    Ok(Json(profile(&state, &user).await?))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    services::change_password(&state, user_id, payload).await?;
    Ok(Json(MessageResponse::new("Password changed.")))
}


#[cfg(test)]
mod route_tests {
    use super::*;
    use crate::app::build_app;
    use axum::{
        body::Body,
        http::{header, Request},
        response::Response,
    };
    use tower::ServiceExt;

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn guest_session_issues_usable_token() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let app = build_app(state);

        let resp = app
            .oneshot(post_json("/api/v1/auth/guest", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["quota"], 2);

        let token = json["guest_token"].as_str().unwrap();
        let claims = keys.verify(token).unwrap();
        assert_eq!(
            GuestSessionId::from(claims.sub).as_str(),
            json["guest_session_id"].as_str().unwrap()
        );
    }

    #[tokio::test]
    async fn weak_signup_password_is_rejected() {
        let app = build_app(AppState::fake());
        let resp = app
            .oneshot(post_json(
                "/api/v1/auth/signup",
                serde_json::json!({
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "username": "ada",
                    "email": "ada@example.com",
                    "password": "short",
                    "confirm": "short",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "validation_error");
    }

    #[tokio::test]
    async fn signout_accepts_guest_token() {
        let state = AppState::fake();
        let token = JwtKeys::from_ref(&state).sign_guest(Uuid::new_v4()).unwrap();
        let app = build_app(state);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/signout")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn guest_token_cannot_read_profile() {
        let state = AppState::fake();
        let token = JwtKeys::from_ref(&state).sign_guest(Uuid::new_v4()).unwrap();
        let app = build_app(state);

        let req = Request::builder()
            .uri("/api/v1/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
