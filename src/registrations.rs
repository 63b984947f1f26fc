//! Enrollment flow: students apply for a course, staff approve. Only an
//! approved (active) enrollment opens the course content.

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{
    cache::{Cache, keys},
    courses,
    error::AppError,
    utils::now_utc,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct EnrollmentOut {
    pub id: i64,
    pub course: i64,
    pub title: String,
    pub is_active: bool,
}

async fn find(db: &SqlitePool, enrollment_id: i64) -> Result<Option<EnrollmentOut>, AppError> {
    let row = sqlx::query_as::<_, EnrollmentOut>(
        "SELECT e.id, e.course_id AS course, c.title, e.is_active FROM enrollment e \
         JOIN course c ON e.course_id = c.id WHERE e.id = ?",
    )
    .bind(enrollment_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Apply for a course. The row starts inactive until staff approval; the
/// table's unique constraint turns a second application into a conflict.
pub async fn apply(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
) -> Result<EnrollmentOut, AppError> {
    if !courses::course_exists(db, course_id).await? {
        return Err(AppError::NotFound("course not found".to_string()));
    }
    let now = now_utc();
    let result = sqlx::query(
        "INSERT INTO enrollment (course_id, student_id, is_active, created_at, updated_at) \
         VALUES (?, ?, 0, ?, ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .bind(now)
    .bind(now)
    .execute(db)
    .await;
    let id = match result {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(AppError::Conflict(
                "already applied for this course".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(student_id, course_id, "enrollment requested");
    find(db, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("enrollment row vanished")))
}

/// Courses the student is actively enrolled in. An empty set is a 404, the
/// client treats it as "nothing in progress".
pub async fn in_progress(db: &SqlitePool, student_id: i64) -> Result<Vec<EnrollmentOut>, AppError> {
    let rows = sqlx::query_as::<_, EnrollmentOut>(
        "SELECT e.id, e.course_id AS course, c.title, e.is_active FROM enrollment e \
         JOIN course c ON e.course_id = c.id \
         WHERE e.student_id = ? AND e.is_active = 1 ORDER BY e.id",
    )
    .bind(student_id)
    .fetch_all(db)
    .await?;
    if rows.is_empty() {
        return Err(AppError::NotFound(
            "no enrollments in progress".to_string(),
        ));
    }
    Ok(rows)
}

/// Staff approval: activates the enrollment and drops the student's cached
/// lecture list so the course shows up right away.
pub async fn approve(db: &SqlitePool, cache: &Cache, enrollment_id: i64) -> Result<(), AppError> {
    let student_id: Option<i64> =
        sqlx::query_scalar("SELECT student_id FROM enrollment WHERE id = ?")
            .bind(enrollment_id)
            .fetch_optional(db)
            .await?;
    let student_id =
        student_id.ok_or_else(|| AppError::NotFound("enrollment not found".to_string()))?;
    sqlx::query("UPDATE enrollment SET is_active = 1, updated_at = ? WHERE id = ?")
        .bind(now_utc())
        .bind(enrollment_id)
        .execute(db)
        .await?;
    cache.del(&keys::student_lectures(student_id)).await?;
    tracing::info!(enrollment_id, student_id, "enrollment approved");
    Ok(())
}
