use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{error::AppError, utils::now_utc};

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Terms {
    pub id: i64,
    pub name: String,
    pub detail: String,
    pub is_active: bool,
    pub is_required: bool,
}

/// One consent checkbox from the signup form.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TermsAgreementInput {
    pub terms: i64,
    pub is_agreed: bool,
}

/// Terms currently presented to new users.
pub async fn list_active(db: &SqlitePool) -> Result<Vec<Terms>, AppError> {
    let terms = sqlx::query_as::<_, Terms>(
        "SELECT id, name, detail, is_active, is_required FROM terms \
         WHERE is_active = 1 ORDER BY id",
    )
    .fetch_all(db)
    .await?;
    Ok(terms)
}

pub async fn create_terms(
    db: &SqlitePool,
    name: &str,
    detail: &str,
    is_active: bool,
    is_required: bool,
) -> Result<i64, AppError> {
    let id = sqlx::query(
        "INSERT INTO terms (name, detail, is_active, is_required, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(detail)
    .bind(is_active)
    .bind(is_required)
    .bind(now_utc())
    .execute(db)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Check the consent list against the active terms and persist it. Every
/// required active term must be agreed to; runs inside the signup
/// transaction so a rejected consent rolls the account back.
pub async fn validate_and_record(
    conn: &mut SqliteConnection,
    user_id: i64,
    agreements: &[TermsAgreementInput],
) -> Result<(), AppError> {
    let required: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM terms WHERE is_active = 1 AND is_required = 1",
    )
    .fetch_all(&mut *conn)
    .await?;
    for terms_id in &required {
        let agreed = agreements
            .iter()
            .any(|a| a.terms == *terms_id && a.is_agreed);
        if !agreed {
            return Err(AppError::Validation(
                "all required terms must be agreed to".to_string(),
            ));
        }
    }
    for agreement in agreements {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM terms WHERE id = ?")
            .bind(agreement.terms)
            .fetch_one(&mut *conn)
            .await?;
        if exists == 0 {
            return Err(AppError::Validation(format!(
                "unknown terms id {}",
                agreement.terms
            )));
        }
        sqlx::query(
            "INSERT INTO terms_agreement (user_id, terms_id, is_agreed, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(agreement.terms)
        .bind(agreement.is_agreed)
        .bind(now_utc())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
