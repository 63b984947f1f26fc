use std::sync::LazyLock;

use rand::RngExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    auth::{self, TokenKind, blacklist_refresh, is_blacklisted, verify_token},
    cache::{Cache, EMAIL_RATE_LIMIT_TTL, VERIFICATION_CODE_TTL, VERIFIED_EMAIL_TTL, keys},
    config::ServerConfig,
    error::AppError,
    terms::{self, TermsAgreementInput},
    utils::now_utc,
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{10,11}$").unwrap());

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub name: String,
    pub nickname: String,
    pub phone_number: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserOut {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub nickname: String,
    pub phone_number: String,
}

impl From<&User> for UserOut {
    fn from(user: &User) -> Self {
        UserOut {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            nickname: user.nickname.clone(),
            phone_number: user.phone_number.clone(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub nickname: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub terms_agreements: Vec<TermsAgreementInput>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub phone_number: Option<String>,
}

pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn issue_pair(config: &ServerConfig, user_id: i64) -> anyhow::Result<TokenPair> {
    let access = auth::issue_token(
        &config.jwt_secret,
        user_id,
        TokenKind::Access,
        time::Duration::minutes(config.access_token_minutes),
    )?;
    let refresh = auth::issue_token(
        &config.jwt_secret,
        user_id,
        TokenKind::Refresh,
        time::Duration::days(config.refresh_token_days),
    )?;
    Ok(TokenPair { access, refresh })
}

fn validate_email(email: &str) -> Result<(), AppError> {
    if !EMAIL_RE.is_match(email) {
        return Err(AppError::Validation("invalid email address".to_string()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), AppError> {
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_special = password.chars().any(|c| "!@#$%^&*()".contains(c));
    if password.len() < 8 || !has_letter || !has_special {
        return Err(AppError::Validation(
            "password must be at least 8 characters and contain a letter and one of !@#$%^&*()"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), AppError> {
    if !PHONE_RE.is_match(phone) {
        return Err(AppError::Validation(
            "phone number must be 10 or 11 digits".to_string(),
        ));
    }
    Ok(())
}

/// Phone numbers stay reserved even after withdrawal, until the row is
/// purged.
async fn phone_taken(db: &SqlitePool, phone: &str) -> Result<bool, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user WHERE phone_number = ?")
        .bind(phone)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

/// Live (not soft-deleted) user by id.
pub async fn find_user(db: &SqlitePool, id: i64) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM user WHERE id = ? AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, AppError> {
    let user =
        sqlx::query_as::<_, User>("SELECT * FROM user WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_optional(db)
            .await?;
    Ok(user)
}

/// Issue a 6-digit signup code for the address. One request per address per
/// minute; already-registered addresses are refused before any send.
pub async fn request_verification_code(
    db: &SqlitePool,
    cache: &Cache,
    email: &str,
) -> Result<(), AppError> {
    validate_email(email)?;
    if find_by_email(db, email).await?.is_some() {
        return Err(AppError::Validation(
            "email is already registered".to_string(),
        ));
    }
    if cache.exists(&keys::email_request_limit(email)).await? {
        return Err(AppError::Validation(
            "verification code was sent recently, try again later".to_string(),
        ));
    }
    let code = format!("{:06}", rand::rng().random_range(100_000..1_000_000));
    cache
        .set_ex(&keys::email_verification(email), &code, VERIFICATION_CODE_TTL)
        .await?;
    cache
        .set_ex(&keys::email_request_limit(email), "1", EMAIL_RATE_LIMIT_TTL)
        .await?;
    // Mail delivery is handed off out of process; the code is traced for
    // local runs where no relay is configured.
    tracing::info!(email, "verification code issued");
    tracing::debug!(email, code, "verification code value");
    Ok(())
}

/// Check a submitted code and mark the address verified for one hour.
pub async fn confirm_verification_code(
    cache: &Cache,
    email: &str,
    code: &str,
) -> Result<(), AppError> {
    let stored = cache.get(&keys::email_verification(email)).await?;
    match stored {
        Some(expected) if expected == code => {
            cache
                .set_ex(&keys::verified_email(email), "1", VERIFIED_EMAIL_TTL)
                .await?;
            cache.del(&keys::email_verification(email)).await?;
            Ok(())
        }
        _ => Err(AppError::Validation(
            "invalid or expired verification code".to_string(),
        )),
    }
}

/// Create the account and its student profile in one transaction. The email
/// must have been verified beforehand and every required term agreed to.
pub async fn signup(db: &SqlitePool, cache: &Cache, req: SignupRequest) -> Result<UserOut, AppError> {
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    validate_phone(&req.phone_number)?;
    if req.nickname.trim().is_empty() || req.name.trim().is_empty() {
        return Err(AppError::Validation(
            "name and nickname must not be empty".to_string(),
        ));
    }
    if !cache.exists(&keys::verified_email(&req.email)).await? {
        return Err(AppError::Validation("email is not verified".to_string()));
    }
    if find_by_email(db, &req.email).await?.is_some() {
        return Err(AppError::Conflict(
            "email is already registered".to_string(),
        ));
    }
    if phone_taken(db, &req.phone_number).await? {
        return Err(AppError::Conflict(
            "phone number is already registered".to_string(),
        ));
    }
    let password_hash = auth::hash_password(&req.password)?;
    let now = now_utc();

    let mut tx = db.begin().await?;
    let user_id = sqlx::query(
        "INSERT INTO user \
         (email, password, name, nickname, phone_number, is_active, is_staff, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 1, 0, ?, ?)",
    )
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.name)
    .bind(&req.nickname)
    .bind(&req.phone_number)
    .bind(now)
    .bind(now)
    .execute(tx.as_mut())
    .await?
    .last_insert_rowid();
    sqlx::query("INSERT INTO student (user_id, created_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(now)
        .execute(tx.as_mut())
        .await?;
    terms::validate_and_record(tx.as_mut(), user_id, &req.terms_agreements).await?;
    tx.commit().await?;

    cache.del(&keys::verified_email(&req.email)).await?;
    tracing::info!(user_id, email = req.email, "user signed up");

    let user = find_user(db, user_id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("signup row vanished")))?;
    Ok(UserOut::from(&user))
}

pub async fn login(
    db: &SqlitePool,
    config: &ServerConfig,
    email: &str,
    password: &str,
) -> Result<(UserOut, TokenPair), AppError> {
    let user = find_by_email(db, email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid email or password".to_string()))?;
    if auth::verify_password(password, &user.password).is_err() {
        return Err(AppError::Unauthorized(
            "invalid email or password".to_string(),
        ));
    }
    let pair = issue_pair(config, user.id)?;
    Ok((UserOut::from(&user), pair))
}

/// Rotate a refresh token: the presented token is revoked and a fresh pair
/// is issued, so every refresh token works at most once.
pub async fn refresh(
    db: &SqlitePool,
    cache: &Cache,
    config: &ServerConfig,
    refresh_token: &str,
) -> Result<TokenPair, AppError> {
    let claims = verify_token(&config.jwt_secret, refresh_token, TokenKind::Refresh)?;
    if is_blacklisted(cache, &claims.jti).await? {
        return Err(AppError::Unauthorized(
            "refresh token has been revoked".to_string(),
        ));
    }
    let user = find_user(db, claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user not found".to_string()))?;
    blacklist_refresh(cache, &claims).await?;
    let pair = issue_pair(config, user.id)?;
    Ok(pair)
}

pub async fn logout(cache: &Cache, config: &ServerConfig, refresh_token: &str) -> Result<(), AppError> {
    let claims = verify_token(&config.jwt_secret, refresh_token, TokenKind::Refresh)?;
    blacklist_refresh(cache, &claims).await
}

pub async fn update_profile(
    db: &SqlitePool,
    user_id: i64,
    update: ProfileUpdate,
) -> Result<UserOut, AppError> {
    let user = find_user(db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    let name = update.name.unwrap_or(user.name);
    let nickname = update.nickname.unwrap_or(user.nickname);
    let phone_number = update.phone_number.unwrap_or(user.phone_number);
    if nickname.trim().is_empty() || name.trim().is_empty() {
        return Err(AppError::Validation(
            "name and nickname must not be empty".to_string(),
        ));
    }
    validate_phone(&phone_number)?;
    sqlx::query(
        "UPDATE user SET name = ?, nickname = ?, phone_number = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&nickname)
    .bind(&phone_number)
    .bind(now_utc())
    .bind(user_id)
    .execute(db)
    .await?;
    let user = find_user(db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    Ok(UserOut::from(&user))
}

pub async fn change_password(
    db: &SqlitePool,
    user_id: i64,
    current: &str,
    new: &str,
) -> Result<(), AppError> {
    let user = find_user(db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    if auth::verify_password(current, &user.password).is_err() {
        return Err(AppError::Validation(
            "current password is incorrect".to_string(),
        ));
    }
    validate_password(new)?;
    let password_hash = auth::hash_password(new)?;
    sqlx::query("UPDATE user SET password = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(now_utc())
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Soft-delete the account. The row is kept for the retention window so a
/// scheduled purge can remove it later; the refresh token dies with it.
pub async fn withdraw(
    db: &SqlitePool,
    cache: &Cache,
    config: &ServerConfig,
    user_id: i64,
    refresh_token: Option<&str>,
) -> Result<(), AppError> {
    let now = now_utc();
    sqlx::query("UPDATE user SET is_active = 0, deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(db)
        .await?;
    if let Some(token) = refresh_token {
        if let Ok(claims) = verify_token(&config.jwt_secret, token, TokenKind::Refresh) {
            blacklist_refresh(cache, &claims).await?;
        }
    }
    let student_id: Option<i64> = sqlx::query_scalar("SELECT id FROM student WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(db)
        .await?;
    if let Some(student_id) = student_id {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    tracing::info!(user_id, "user withdrew");
    Ok(())
}

/// Hard-delete accounts whose retention window has passed. Profile rows and
/// their dependents go with them through the foreign keys.
pub async fn purge_withdrawn(db: &SqlitePool, retention_days: i64) -> Result<u64, AppError> {
    let cutoff = now_utc() - time::Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM user WHERE deleted_at IS NOT NULL AND deleted_at <= ?")
        .bind(cutoff)
        .execute(db)
        .await?;
    let purged = result.rows_affected();
    if purged > 0 {
        tracing::info!(purged, "purged withdrawn users");
    }
    Ok(purged)
}

pub async fn create_instructor(
    db: &SqlitePool,
    user_id: i64,
    experience: &str,
) -> Result<i64, AppError> {
    let id = sqlx::query("INSERT INTO instructor (user_id, experience, created_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(experience)
        .bind(now_utc())
        .execute(db)
        .await?
        .last_insert_rowid();
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn signup_req(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "pass123!".to_string(),
            name: "Mina".to_string(),
            nickname: "mina".to_string(),
            phone_number: "01012345678".to_string(),
            terms_agreements: vec![],
        }
    }

    #[test]
    fn password_policy() {
        assert!(validate_password("pass123!").is_ok());
        assert!(validate_password("short!a").is_err());
        assert!(validate_password("passwords").is_err());
        assert!(validate_password("!!!!!!!!").is_err());
    }

    #[test]
    fn phone_policy() {
        assert!(validate_phone("01012345678").is_ok());
        assert!(validate_phone("").is_err());
        assert!(validate_phone("010-1234-5678").is_err());
        assert!(validate_phone("123").is_err());
    }

    #[tokio::test]
    async fn verification_code_flow() {
        let db = testing::pool().await;
        let cache = Cache::memory();

        request_verification_code(&db, &cache, "new@t.co").await.unwrap();
        let code = cache
            .get(&keys::email_verification("new@t.co"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code.len(), 6);

        // A second request inside the rate-limit window is refused.
        let err = request_verification_code(&db, &cache, "new@t.co")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(confirm_verification_code(&cache, "new@t.co", "000000")
            .await
            .is_err());
        confirm_verification_code(&cache, "new@t.co", &code).await.unwrap();
        assert!(cache.exists(&keys::verified_email("new@t.co")).await.unwrap());
        // Confirmed codes are single-use.
        assert!(confirm_verification_code(&cache, "new@t.co", &code)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn signup_requires_verified_email() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let err = signup(&db, &cache, signup_req("new@t.co")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn signup_creates_student_profile() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        cache
            .set_ex(&keys::verified_email("new@t.co"), "1", VERIFIED_EMAIL_TTL)
            .await
            .unwrap();

        let out = signup(&db, &cache, signup_req("new@t.co")).await.unwrap();
        assert_eq!(out.email, "new@t.co");
        let student: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student WHERE user_id = ?")
            .bind(out.id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(student, 1);
        // The verified flag is consumed by signup.
        assert!(!cache.exists(&keys::verified_email("new@t.co")).await.unwrap());

        cache
            .set_ex(&keys::verified_email("new@t.co"), "1", VERIFIED_EMAIL_TTL)
            .await
            .unwrap();
        let err = signup(&db, &cache, signup_req("new@t.co")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn signup_rolls_back_without_required_terms() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        terms::create_terms(&db, "privacy", "...", true, true).await.unwrap();
        cache
            .set_ex(&keys::verified_email("new@t.co"), "1", VERIFIED_EMAIL_TTL)
            .await
            .unwrap();

        // signup_req agrees to nothing, so the required term is missing.
        let err = signup(&db, &cache, signup_req("new@t.co")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // The transaction went back whole: no account, no student profile.
        assert!(find_by_email(&db, "new@t.co").await.unwrap().is_none());
        let students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(students, 0);
        // The verified flag is only consumed on success.
        assert!(cache.exists(&keys::verified_email("new@t.co")).await.unwrap());
    }

    #[tokio::test]
    async fn login_and_refresh_rotation() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let config = testing::config();
        cache
            .set_ex(&keys::verified_email("u@t.co"), "1", VERIFIED_EMAIL_TTL)
            .await
            .unwrap();
        signup(&db, &cache, signup_req("u@t.co")).await.unwrap();

        assert!(matches!(
            login(&db, &config, "u@t.co", "wrong999").await,
            Err(AppError::Unauthorized(_))
        ));
        let (out, pair) = login(&db, &config, "u@t.co", "pass123!").await.unwrap();
        assert_eq!(out.email, "u@t.co");

        let rotated = refresh(&db, &cache, &config, &pair.refresh).await.unwrap();
        assert_ne!(rotated.refresh, pair.refresh);
        // The old refresh token is spent.
        assert!(matches!(
            refresh(&db, &cache, &config, &pair.refresh).await,
            Err(AppError::Unauthorized(_))
        ));
        // The rotated one still works.
        refresh(&db, &cache, &config, &rotated.refresh).await.unwrap();
    }

    #[tokio::test]
    async fn withdraw_then_purge() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let config = testing::config();
        let user = testing::user(&db, "gone@t.co", false).await;
        testing::student(&db, user.id).await;

        withdraw(&db, &cache, &config, user.id, None).await.unwrap();
        assert!(find_user(&db, user.id).await.unwrap().is_none());
        assert!(find_by_email(&db, "gone@t.co").await.unwrap().is_none());

        // Inside the retention window nothing is purged.
        assert_eq!(purge_withdrawn(&db, 30).await.unwrap(), 0);
        assert_eq!(purge_withdrawn(&db, 0).await.unwrap(), 1);
        let students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student WHERE user_id = ?")
            .bind(user.id)
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(students, 0);
    }

    #[tokio::test]
    async fn instructor_provisioning_grants_the_role() {
        let db = testing::pool().await;
        let user = testing::user(&db, "vet@t.co", false).await;
        let instructor_id = create_instructor(&db, user.id, "ten years of Rust").await.unwrap();

        let role = auth::resolve_role(&db, &user).await.unwrap();
        assert_eq!(role, Some(auth::Role::Instructor { id: instructor_id }));
    }

    #[tokio::test]
    async fn profile_update_and_password_change() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let config = testing::config();
        cache
            .set_ex(&keys::verified_email("p@t.co"), "1", VERIFIED_EMAIL_TTL)
            .await
            .unwrap();
        let out = signup(&db, &cache, signup_req("p@t.co")).await.unwrap();

        let updated = update_profile(
            &db,
            out.id,
            ProfileUpdate {
                name: None,
                nickname: Some("renamed".to_string()),
                phone_number: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.nickname, "renamed");
        assert_eq!(updated.name, "Mina");
        assert_eq!(updated.phone_number, "01012345678");

        assert!(matches!(
            change_password(&db, out.id, "wrong999", "next567!").await,
            Err(AppError::Validation(_))
        ));
        change_password(&db, out.id, "pass123!", "next567!").await.unwrap();
        login(&db, &config, "p@t.co", "next567!").await.unwrap();
    }
}
