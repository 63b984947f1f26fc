use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    cache::{Cache, keys},
    error::AppError,
    state::AppState,
    users::{self, User},
    utils::now_utc,
};

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(password_hash)
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<()> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|e| anyhow::anyhow!("Failed to verify password: {}", e))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub exp: i64,
    pub jti: String,
    pub token_type: String,
}

fn new_jti() -> String {
    let mut rng = rand::rng();
    format!("{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}

pub fn issue_token(
    secret: &str,
    user_id: i64,
    kind: TokenKind,
    lifetime: time::Duration,
) -> anyhow::Result<String> {
    let exp = (now_utc() + lifetime).unix_timestamp();
    let claims = Claims {
        sub: user_id,
        exp,
        jti: new_jti(),
        token_type: kind.as_str().to_string(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn verify_token(secret: &str, token: &str, kind: TokenKind) -> Result<Claims, AppError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?
    .claims;
    if claims.token_type != kind.as_str() {
        return Err(AppError::Unauthorized(format!(
            "expected {} token",
            kind.as_str()
        )));
    }
    Ok(claims)
}

/// Revoke a refresh token for the remainder of its lifetime. Called on
/// rotation, logout and withdrawal.
pub async fn blacklist_refresh(cache: &Cache, claims: &Claims) -> Result<(), AppError> {
    let remaining = claims.exp - now_utc().unix_timestamp();
    let ttl = std::time::Duration::from_secs(remaining.max(1) as u64);
    cache
        .set_ex(&keys::refresh_blacklist(&claims.jti), "1", ttl)
        .await
}

pub async fn is_blacklisted(cache: &Cache, jti: &str) -> Result<bool, AppError> {
    cache.exists(&keys::refresh_blacklist(jti)).await
}

/// Role derived from the profile rows referencing the user, resolved once
/// per request. A user with neither profile row carries no role and fails
/// every role gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student { id: i64 },
    Instructor { id: i64 },
    Staff,
}

pub async fn resolve_role(db: &SqlitePool, user: &User) -> Result<Option<Role>, AppError> {
    if user.is_staff {
        return Ok(Some(Role::Staff));
    }
    let instructor_id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM instructor WHERE user_id = ?")
            .bind(user.id)
            .fetch_optional(db)
            .await?;
    if let Some(id) = instructor_id {
        return Ok(Some(Role::Instructor { id }));
    }
    let student_id: Option<i64> = sqlx::query_scalar("SELECT id FROM student WHERE user_id = ?")
        .bind(user.id)
        .fetch_optional(db)
        .await?;
    Ok(student_id.map(|id| Role::Student { id }))
}

/// Authenticated identity, extracted from the bearer token. Soft-deleted
/// users fail extraction even while their tokens are still unexpired.
pub struct AuthUser {
    pub user: User,
    pub role: Option<Role>,
}

impl AuthUser {
    pub fn student_id(&self) -> Option<i64> {
        match self.role {
            Some(Role::Student { id }) => Some(id),
            _ => None,
        }
    }

    /// Instructor privileges; staff count as instructors for feedback and
    /// comment visibility.
    pub fn is_instructor(&self) -> bool {
        matches!(self.role, Some(Role::Instructor { .. }) | Some(Role::Staff))
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::Unauthorized("missing bearer token".to_string()))?;
        let claims = verify_token(&state.config.jwt_secret, bearer.token(), TokenKind::Access)?;
        let user = users::find_user(&state.db, claims.sub)
            .await?
            .ok_or_else(|| AppError::Unauthorized("user not found".to_string()))?;
        let role = resolve_role(&state.db, &user).await?;
        Ok(AuthUser { user, role })
    }
}

/// The caller must hold the student role.
pub fn require_student(auth: &AuthUser) -> Result<i64, AppError> {
    auth.student_id()
        .ok_or_else(|| AppError::Permission("only students may access this".to_string()))
}

/// An approved (active) enrollment must link the student to the course.
pub async fn ensure_active_enrollment(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<(), AppError> {
    let enrolled: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollment \
         WHERE student_id = ? AND course_id = ? AND is_active = 1",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(db)
    .await?;
    if enrolled == 0 {
        return Err(AppError::Permission(
            "only students enrolled in this course may access it".to_string(),
        ));
    }
    Ok(())
}

/// Student role plus an active enrollment for the target course.
pub async fn require_enrolled_student(
    db: &SqlitePool,
    auth: &AuthUser,
    course_id: i64,
) -> Result<i64, AppError> {
    let student_id = require_student(auth)?;
    ensure_active_enrollment(db, student_id, course_id).await?;
    Ok(student_id)
}

/// Instructors and staff pass outright; students must be enrolled in the
/// target course.
pub async fn require_instructor_or_enrolled(
    db: &SqlitePool,
    auth: &AuthUser,
    course_id: i64,
) -> Result<(), AppError> {
    if auth.is_instructor() {
        return Ok(());
    }
    require_enrolled_student(db, auth, course_id).await?;
    Ok(())
}
