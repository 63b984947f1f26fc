//! Lecture reviews. A student reviews a lecture once; the nickname is
//! snapshotted so the review outlives account renames and withdrawal.

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    utils::{now_utc, round1},
};

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ReviewOut {
    pub id: i64,
    pub lecture: i64,
    pub student: Option<i64>,
    pub lecture_title: String,
    pub student_nickname: String,
    pub star: f64,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct MyReviewOut {
    pub id: i64,
    pub lecture: i64,
    pub lecture_title: String,
    pub student_nickname: String,
    pub star: f64,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewInput {
    pub star: f64,
    pub content: String,
}

fn validate_input(input: &ReviewInput) -> Result<(), AppError> {
    if !input.star.is_finite() || !(1.0..=5.0).contains(&input.star) {
        return Err(AppError::Validation(
            "star rating must be between 1.0 and 5.0".to_string(),
        ));
    }
    if input.content.trim().is_empty() {
        return Err(AppError::Validation(
            "review content must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Public review feed for a lecture; no reviews yet is a 404.
pub async fn list_for_lecture(
    db: &SqlitePool,
    lecture_id: i64,
) -> Result<Vec<ReviewOut>, AppError> {
    let rows = sqlx::query_as::<_, ReviewOut>(
        "SELECT r.id, r.lecture_id AS lecture, r.student_id AS student, \
         l.title AS lecture_title, r.student_nickname, r.star, r.content \
         FROM review r JOIN lecture l ON r.lecture_id = l.id \
         WHERE r.lecture_id = ? ORDER BY r.id DESC",
    )
    .bind(lecture_id)
    .fetch_all(db)
    .await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(
            "no reviews found for this lecture".to_string(),
        ));
    }
    Ok(rows)
}

pub async fn my_reviews(db: &SqlitePool, student_id: i64) -> Result<Vec<MyReviewOut>, AppError> {
    let rows = sqlx::query_as::<_, MyReviewOut>(
        "SELECT r.id, r.lecture_id AS lecture, l.title AS lecture_title, \
         r.student_nickname, r.star, r.content \
         FROM review r JOIN lecture l ON r.lecture_id = l.id \
         WHERE r.student_id = ? ORDER BY r.id DESC",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;
    if rows.is_empty() {
        return Err(AppError::NotFound("no reviews written yet".to_string()));
    }
    Ok(rows)
}

/// Submit a review. Star ratings keep one decimal; the unique constraint
/// turns a second review of the same lecture into a conflict.
pub async fn submit(
    db: &SqlitePool,
    student_id: i64,
    lecture_id: i64,
    input: ReviewInput,
) -> Result<ReviewOut, AppError> {
    validate_input(&input)?;
    let lecture_title: Option<String> =
        sqlx::query_scalar("SELECT title FROM lecture WHERE id = ?")
            .bind(lecture_id)
            .fetch_optional(db)
            .await?;
    let lecture_title =
        lecture_title.ok_or_else(|| AppError::NotFound("lecture not found".to_string()))?;
    let nickname: String = sqlx::query_scalar(
        "SELECT u.nickname FROM student s JOIN user u ON s.user_id = u.id WHERE s.id = ?",
    )
    .bind(student_id)
    .fetch_one(db)
    .await?;

    let star = round1(input.star);
    let now = now_utc();
    let result = sqlx::query(
        "INSERT INTO review (lecture_id, student_id, student_nickname, star, content, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(lecture_id)
    .bind(student_id)
    .bind(&nickname)
    .bind(star)
    .bind(&input.content)
    .bind(now)
    .bind(now)
    .execute(db)
    .await;
    let id = match result {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict(
                "this lecture has already been reviewed".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(ReviewOut {
        id,
        lecture: lecture_id,
        student: Some(student_id),
        lecture_title,
        student_nickname: nickname,
        star,
        content: input.content,
    })
}
