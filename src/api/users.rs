use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};
use utoipa::ToSchema;

use crate::{
    auth::AuthUser,
    error::AppError,
    state::AppState,
    users::{self, ProfileUpdate, SignupRequest, UserOut},
};

pub(crate) const REFRESH_COOKIE: &str = "refresh_token";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/send-email-verification/", post(send_email_verification))
        .route("/verify-email-code/", post(verify_email_code))
        .route("/signup/", post(signup))
        .route("/login/", post(login))
        .route("/token-refresh/", post(token_refresh))
        .route("/logout/", post(logout))
        .route("/withdrawal/", post(withdrawal))
        .route("/myinfo/", get(myinfo).patch(update_myinfo))
        .route("/password-change/", patch(password_change))
}

fn set_refresh_cookie(cookies: &Cookies, token: String, days: i64) {
    let cookie = Cookie::build((REFRESH_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(tower_cookies::cookie::time::Duration::days(days))
        .build();
    cookies.add(cookie);
}

fn clear_refresh_cookie(cookies: &Cookies) {
    let mut cookie = Cookie::new(REFRESH_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
}

#[derive(Deserialize, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

#[utoipa::path(
    context_path = "/users",
    path = "/send-email-verification/",
    method(post),
    request_body = EmailRequest,
    responses(
        (status = 200, description = "Verification code issued and mailed"),
        (status = 400, description = "Invalid address, already registered, or rate limited")
    )
)]
pub async fn send_email_verification(
    State(state): State<AppState>,
    Json(req): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    users::request_verification_code(&state.db, &state.cache, &req.email).await?;
    Ok(Json(json!({"detail": "verification code sent"})))
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[utoipa::path(
    context_path = "/users",
    path = "/verify-email-code/",
    method(post),
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Email verified for signup"),
        (status = 400, description = "Wrong or expired code")
    )
)]
pub async fn verify_email_code(
    State(state): State<AppState>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    users::confirm_verification_code(&state.cache, &req.email, &req.code).await?;
    Ok(Json(json!({"detail": "email verified"})))
}

#[utoipa::path(
    context_path = "/users",
    path = "/signup/",
    method(post),
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = UserOut),
        (status = 400, description = "Validation failed, email unverified, or required terms missing")
    )
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = users::signup(&state.db, &state.cache, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginOut {
    pub access: String,
    pub user: UserOut,
}

#[utoipa::path(
    context_path = "/users",
    path = "/login/",
    method(post),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Access token in the body, refresh token as an httponly cookie", body = LoginOut),
        (status = 401, description = "Unknown email or wrong password")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginOut>, AppError> {
    let (user, pair) = users::login(&state.db, &state.config, &req.email, &req.password).await?;
    set_refresh_cookie(&cookies, pair.refresh, state.config.refresh_token_days);
    Ok(Json(LoginOut { access: pair.access, user }))
}

#[derive(Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh: Option<String>,
}

/// The refresh token is read from the httponly cookie; a JSON body is
/// accepted as a fallback for non-browser clients.
fn presented_refresh_token(cookies: &Cookies, body: Option<Json<RefreshRequest>>) -> Option<String> {
    cookies
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|Json(req)| req.refresh))
}

#[utoipa::path(
    context_path = "/users",
    path = "/token-refresh/",
    method(post),
    responses(
        (status = 200, description = "Fresh access token; the refresh cookie is rotated"),
        (status = 401, description = "Refresh token missing, expired, or already used")
    )
)]
pub async fn token_refresh(
    State(state): State<AppState>,
    cookies: Cookies,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let token = presented_refresh_token(&cookies, body)
        .ok_or_else(|| AppError::Unauthorized("refresh token missing".to_string()))?;
    let pair = users::refresh(&state.db, &state.cache, &state.config, &token).await?;
    set_refresh_cookie(&cookies, pair.refresh, state.config.refresh_token_days);
    Ok(Json(json!({"access": pair.access})))
}

#[utoipa::path(
    context_path = "/users",
    path = "/logout/",
    method(post),
    responses(
        (status = 200, description = "Refresh token blacklisted and cookie cleared"),
        (status = 401, description = "Refresh token missing or invalid")
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let token = presented_refresh_token(&cookies, body)
        .ok_or_else(|| AppError::Unauthorized("refresh token missing".to_string()))?;
    users::logout(&state.cache, &state.config, &token).await?;
    clear_refresh_cookie(&cookies);
    Ok(Json(json!({"detail": "logged out"})))
}

#[utoipa::path(
    context_path = "/users",
    path = "/withdrawal/",
    method(post),
    responses(
        (status = 200, description = "Account soft-deleted, tokens revoked"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn withdrawal(
    State(state): State<AppState>,
    cookies: Cookies,
    auth: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let refresh = cookies.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    users::withdraw(
        &state.db,
        &state.cache,
        &state.config,
        auth.user.id,
        refresh.as_deref(),
    )
    .await?;
    clear_refresh_cookie(&cookies);
    Ok(Json(json!({"detail": "account withdrawn"})))
}

#[utoipa::path(
    context_path = "/users",
    path = "/myinfo/",
    method(get),
    responses(
        (status = 200, description = "Profile of the logged-in user", body = UserOut),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn myinfo(auth: AuthUser) -> Json<UserOut> {
    Json(UserOut::from(&auth.user))
}

#[utoipa::path(
    context_path = "/users",
    path = "/myinfo/",
    method(patch),
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Updated profile", body = UserOut),
        (status = 400, description = "Invalid nickname or phone number"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn update_myinfo(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserOut>, AppError> {
    let user = users::update_profile(&state.db, auth.user.id, update).await?;
    Ok(Json(user))
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

#[utoipa::path(
    context_path = "/users",
    path = "/password-change/",
    method(patch),
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password replaced"),
        (status = 400, description = "Wrong current password, or the new one fails the policy"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn password_change(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PasswordChangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    users::change_password(&state.db, auth.user.id, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(json!({"detail": "password changed"})))
}
