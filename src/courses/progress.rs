//! Per-student watch progress on chapter videos. One row per (student,
//! video), enforced by the table itself; completion feeds the lecture
//! progress rates.

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{
    cache::{Cache, keys},
    error::AppError,
    utils::{now_utc, round2},
};

/// Watched fraction at which a video counts as completed, in percent.
pub const COMPLETION_THRESHOLD: f64 = 98.0;

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
pub struct ProgressInput {
    /// Seconds watched so far.
    pub last_watched_time: f64,
    /// Total video length in seconds, as reported by the player.
    pub total_duration: f64,
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct ProgressOut {
    pub id: i64,
    pub student_id: i64,
    pub progress: f64,
    pub is_completed: bool,
}

fn validate_input(input: ProgressInput) -> Result<(), AppError> {
    if !input.last_watched_time.is_finite() || !input.total_duration.is_finite() {
        return Err(AppError::Validation(
            "watched time and duration must be numbers".to_string(),
        ));
    }
    if input.last_watched_time < 0.0 || input.total_duration < 0.0 {
        return Err(AppError::Validation(
            "watched time and duration must not be negative".to_string(),
        ));
    }
    if input.last_watched_time > input.total_duration {
        return Err(AppError::Validation(
            "watched time cannot exceed the video duration".to_string(),
        ));
    }
    Ok(())
}

/// Watched percentage, clamped to 0..=100. A zero-length video yields 0.
fn compute_progress(input: ProgressInput) -> f64 {
    if input.total_duration == 0.0 {
        return 0.0;
    }
    round2((input.last_watched_time / input.total_duration * 100.0).clamp(0.0, 100.0))
}

async fn find_by_video(
    db: &SqlitePool,
    student_id: i64,
    video_id: i64,
) -> Result<Option<ProgressOut>, AppError> {
    let row = sqlx::query_as::<_, ProgressOut>(
        "SELECT id, student_id, progress, is_completed FROM progress_tracking \
         WHERE student_id = ? AND chapter_video_id = ?",
    )
    .bind(student_id)
    .bind(video_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Current progress record for the student on this video.
pub async fn get_state(
    db: &SqlitePool,
    student_id: i64,
    video_id: i64,
) -> Result<ProgressOut, AppError> {
    find_by_video(db, student_id, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("progress record not found".to_string()))
}

/// Start tracking a video for a student. Idempotent: when a row already
/// exists it is returned untouched, so replaying the first heartbeat can
/// never reset progress. The returned flag tells whether a row was created.
pub async fn record(
    db: &SqlitePool,
    cache: &Cache,
    student_id: i64,
    video_id: i64,
    input: ProgressInput,
) -> Result<(ProgressOut, bool), AppError> {
    validate_input(input)?;
    let video_exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chapter_video WHERE id = ?")
        .bind(video_id)
        .fetch_one(db)
        .await?;
    if video_exists == 0 {
        return Err(AppError::NotFound("video not found".to_string()));
    }
    if let Some(existing) = find_by_video(db, student_id, video_id).await? {
        return Ok((existing, false));
    }

    let progress = compute_progress(input);
    let is_completed = progress >= COMPLETION_THRESHOLD;
    let now = now_utc();
    let result = sqlx::query(
        "INSERT INTO progress_tracking \
         (student_id, chapter_video_id, progress, is_completed, last_watched_time, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(student_id)
    .bind(video_id)
    .bind(progress)
    .bind(is_completed)
    .bind(input.last_watched_time)
    .bind(now)
    .bind(now)
    .execute(db)
    .await;
    let id = match result {
        Ok(done) => done.last_insert_rowid(),
        // Lost a race against another heartbeat; the winner's row stands.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            let existing = find_by_video(db, student_id, video_id).await?.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("progress row vanished after conflict"))
            })?;
            return Ok((existing, false));
        }
        Err(e) => return Err(e.into()),
    };
    if is_completed {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    Ok((
        ProgressOut { id, student_id, progress, is_completed },
        true,
    ))
}

/// Overwrite the student's progress on a video with a new heartbeat. Only
/// ever updates: without a prior record this is a 404, never a create. A
/// completion flip in either direction drops the student's cached lecture
/// rates.
pub async fn update(
    db: &SqlitePool,
    cache: &Cache,
    student_id: i64,
    video_id: i64,
    input: ProgressInput,
) -> Result<ProgressOut, AppError> {
    validate_input(input)?;
    let row = find_by_video(db, student_id, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("progress record not found".to_string()))?;

    let progress = compute_progress(input);
    let is_completed = progress >= COMPLETION_THRESHOLD;
    sqlx::query(
        "UPDATE progress_tracking \
         SET progress = ?, is_completed = ?, last_watched_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(progress)
    .bind(is_completed)
    .bind(input.last_watched_time)
    .bind(now_utc())
    .bind(row.id)
    .execute(db)
    .await?;
    if row.is_completed != is_completed {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    Ok(ProgressOut { id: row.id, student_id, progress, is_completed })
}
