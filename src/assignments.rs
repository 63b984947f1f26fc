//! Assignments attached to chapter videos, and the feedback threads under
//! them. Threads are assembled in memory from a single query per
//! assignment; reply depth is unbounded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{
    cache::{Cache, LISTING_TTL, keys},
    error::AppError,
    storage::StorageClient,
    utils::now_utc,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AssignmentOut {
    pub id: i64,
    pub chapter_video: i64,
    pub title: String,
    pub content: String,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChapterAssignmentsOut {
    pub lecture_chapter_id: i64,
    pub assignments: Vec<AssignmentOut>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommentOut {
    pub id: i64,
    pub user: i64,
    pub parent: Option<i64>,
    pub file_url: Option<String>,
    pub content: String,
    #[schema(no_recursion)]
    pub replies: Vec<CommentOut>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentInput {
    pub content: String,
    pub file_url: Option<String>,
    pub parent: Option<i64>,
}

async fn video_chapter_id(db: &SqlitePool, video_id: i64) -> Result<Option<i64>, AppError> {
    let chapter_id: Option<i64> =
        sqlx::query_scalar("SELECT lecture_chapter_id FROM chapter_video WHERE id = ?")
            .bind(video_id)
            .fetch_optional(db)
            .await?;
    Ok(chapter_id)
}

async fn assignment_chapter_id(db: &SqlitePool, assignment_id: i64) -> Result<Option<i64>, AppError> {
    let chapter_id: Option<i64> = sqlx::query_scalar(
        "SELECT cv.lecture_chapter_id FROM assignment a \
         JOIN chapter_video cv ON a.chapter_video_id = cv.id WHERE a.id = ?",
    )
    .bind(assignment_id)
    .fetch_optional(db)
    .await?;
    Ok(chapter_id)
}

/// Course an assignment belongs to, for the enrollment gates.
pub async fn assignment_course_id(
    db: &SqlitePool,
    assignment_id: i64,
) -> Result<Option<i64>, AppError> {
    let course_id: Option<i64> = sqlx::query_scalar(
        "SELECT l.course_id FROM assignment a \
         JOIN chapter_video cv ON a.chapter_video_id = cv.id \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
         JOIN lecture l ON lc.lecture_id = l.id WHERE a.id = ?",
    )
    .bind(assignment_id)
    .fetch_optional(db)
    .await?;
    Ok(course_id)
}

/// All assignments under a chapter's videos, wrapped with the chapter id and
/// cached as one listing.
pub async fn list_for_chapter(
    db: &SqlitePool,
    cache: &Cache,
    chapter_id: i64,
) -> Result<ChapterAssignmentsOut, AppError> {
    if chapter_id <= 0 {
        return Err(AppError::Validation(
            "chapter id must be positive".to_string(),
        ));
    }
    let cache_key = keys::assignments(chapter_id);
    if let Some(cached) = cache.get(&cache_key).await? {
        if let Ok(out) = serde_json::from_str::<ChapterAssignmentsOut>(&cached) {
            return Ok(out);
        }
    }
    let assignments = sqlx::query_as::<_, AssignmentOut>(
        "SELECT a.id, a.chapter_video_id AS chapter_video, a.title, a.content, a.file_url \
         FROM assignment a JOIN chapter_video cv ON a.chapter_video_id = cv.id \
         WHERE cv.lecture_chapter_id = ? ORDER BY a.id",
    )
    .bind(chapter_id)
    .fetch_all(db)
    .await?;
    let out = ChapterAssignmentsOut { lecture_chapter_id: chapter_id, assignments };

    cache
        .set_ex(
            &cache_key,
            &serde_json::to_string(&out).map_err(anyhow::Error::from)?,
            LISTING_TTL,
        )
        .await?;
    Ok(out)
}

pub async fn create_assignment(
    db: &SqlitePool,
    cache: &Cache,
    video_id: i64,
    title: &str,
    content: &str,
    file_url: Option<&str>,
) -> Result<i64, AppError> {
    let chapter_id = video_chapter_id(db, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("video not found".to_string()))?;
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO assignment (chapter_video_id, title, content, file_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(video_id)
    .bind(title)
    .bind(content)
    .bind(file_url)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    cache.del(&keys::assignments(chapter_id)).await?;
    Ok(id)
}

/// Update an assignment, optionally moving it under another video or
/// swapping its attachment. The old chapter's listing is dropped before the
/// write so a move cannot leave it behind stale; a replaced or cleared
/// attachment is removed from storage.
pub async fn update_assignment(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    assignment_id: i64,
    video_id: Option<i64>,
    title: Option<&str>,
    content: Option<&str>,
    file_url: Option<Option<&str>>,
) -> Result<(), AppError> {
    let old_chapter_id = assignment_chapter_id(db, assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("assignment not found".to_string()))?;
    let (old_video_id, old_title, old_content, old_file): (i64, String, String, Option<String>) =
        sqlx::query_as(
            "SELECT chapter_video_id, title, content, file_url FROM assignment WHERE id = ?",
        )
        .bind(assignment_id)
        .fetch_one(db)
        .await?;
    let video_id = video_id.unwrap_or(old_video_id);
    let new_chapter_id = video_chapter_id(db, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("video not found".to_string()))?;
    let new_file = match file_url {
        Some(file) => file.map(str::to_string),
        None => old_file.clone(),
    };

    cache.del(&keys::assignments(old_chapter_id)).await?;
    sqlx::query(
        "UPDATE assignment SET chapter_video_id = ?, title = ?, content = ?, file_url = ?, \
         updated_at = ? WHERE id = ?",
    )
    .bind(video_id)
    .bind(title.map(str::to_string).unwrap_or(old_title))
    .bind(content.map(str::to_string).unwrap_or(old_content))
    .bind(&new_file)
    .bind(now_utc())
    .bind(assignment_id)
    .execute(db)
    .await?;
    cache.del(&keys::assignments(new_chapter_id)).await?;
    if let Some(old) = old_file {
        if new_file.as_deref() != Some(old.as_str()) {
            storage.delete(&old).await;
        }
    }
    Ok(())
}

/// Delete an assignment. Comments go with it through the foreign keys; any
/// attached files (its own and its comments') are routed to storage removal.
pub async fn delete_assignment(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    assignment_id: i64,
) -> Result<(), AppError> {
    let chapter_id = assignment_chapter_id(db, assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("assignment not found".to_string()))?;
    let mut files: Vec<String> = sqlx::query_scalar(
        "SELECT file_url FROM assignment_comment \
         WHERE assignment_id = ? AND file_url IS NOT NULL",
    )
    .bind(assignment_id)
    .fetch_all(db)
    .await?;
    let own_file: Option<String> =
        sqlx::query_scalar("SELECT file_url FROM assignment WHERE id = ?")
            .bind(assignment_id)
            .fetch_one(db)
            .await?;
    files.extend(own_file);

    sqlx::query("DELETE FROM assignment WHERE id = ?")
        .bind(assignment_id)
        .execute(db)
        .await?;
    cache.del(&keys::assignments(chapter_id)).await?;
    for object in files {
        storage.delete(&object).await;
    }
    Ok(())
}

#[derive(FromRow, Clone)]
struct CommentRow {
    id: i64,
    user_id: i64,
    parent_id: Option<i64>,
    file_url: Option<String>,
    content: String,
}

fn build_tree(row: &CommentRow, children: &HashMap<i64, Vec<CommentRow>>) -> CommentOut {
    let replies = children
        .get(&row.id)
        .map(|kids| kids.iter().map(|kid| build_tree(kid, children)).collect())
        .unwrap_or_default();
    CommentOut {
        id: row.id,
        user: row.user_id,
        parent: row.parent_id,
        file_url: row.file_url.clone(),
        content: row.content.clone(),
        replies,
    }
}

async fn assignment_exists(db: &SqlitePool, assignment_id: i64) -> Result<bool, AppError> {
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assignment WHERE id = ?")
        .bind(assignment_id)
        .fetch_one(db)
        .await?;
    Ok(found > 0)
}

/// Feedback thread of an assignment. Instructors and staff see every
/// top-level comment, a student only their own; replies under a visible
/// comment are always included, to any depth.
pub async fn list_comments(
    db: &SqlitePool,
    assignment_id: i64,
    viewer_id: i64,
    viewer_is_instructor: bool,
) -> Result<Vec<CommentOut>, AppError> {
    if !assignment_exists(db, assignment_id).await? {
        return Err(AppError::NotFound("assignment not found".to_string()));
    }
    let rows = sqlx::query_as::<_, CommentRow>(
        "SELECT id, user_id, parent_id, file_url, content FROM assignment_comment \
         WHERE assignment_id = ? ORDER BY id",
    )
    .bind(assignment_id)
    .fetch_all(db)
    .await?;

    let mut children: HashMap<i64, Vec<CommentRow>> = HashMap::new();
    for row in &rows {
        if let Some(parent_id) = row.parent_id {
            children.entry(parent_id).or_default().push(row.clone());
        }
    }
    let thread = rows
        .iter()
        .filter(|row| row.parent_id.is_none())
        .filter(|row| viewer_is_instructor || row.user_id == viewer_id)
        .map(|row| build_tree(row, &children))
        .collect();
    Ok(thread)
}

/// Add a comment or an instructor reply. Replies must name a parent in the
/// same assignment and only instructors and staff may post them.
pub async fn submit_comment(
    db: &SqlitePool,
    assignment_id: i64,
    author_id: i64,
    author_is_instructor: bool,
    input: CommentInput,
) -> Result<i64, AppError> {
    if input.content.trim().is_empty() {
        return Err(AppError::Validation(
            "comment content must not be empty".to_string(),
        ));
    }
    if !assignment_exists(db, assignment_id).await? {
        return Err(AppError::NotFound("assignment not found".to_string()));
    }
    if let Some(parent_id) = input.parent {
        if !author_is_instructor {
            return Err(AppError::Permission(
                "only instructors may reply to comments".to_string(),
            ));
        }
        let parent_assignment: Option<i64> =
            sqlx::query_scalar("SELECT assignment_id FROM assignment_comment WHERE id = ?")
                .bind(parent_id)
                .fetch_optional(db)
                .await?;
        match parent_assignment {
            Some(parent_assignment) if parent_assignment == assignment_id => {}
            _ => {
                return Err(AppError::NotFound(
                    "parent comment not found in this assignment".to_string(),
                ));
            }
        }
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO assignment_comment \
         (assignment_id, user_id, parent_id, file_url, content, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(assignment_id)
    .bind(author_id)
    .bind(input.parent)
    .bind(&input.file_url)
    .bind(&input.content)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Delete a comment and its whole reply subtree. Authors may delete their
/// own comments, instructors and staff anyone's; attached files of the
/// subtree are routed to storage removal.
pub async fn delete_comment(
    db: &SqlitePool,
    storage: &StorageClient,
    comment_id: i64,
    requester_id: i64,
    requester_is_instructor: bool,
) -> Result<(), AppError> {
    let author_id: Option<i64> =
        sqlx::query_scalar("SELECT user_id FROM assignment_comment WHERE id = ?")
            .bind(comment_id)
            .fetch_optional(db)
            .await?;
    let author_id = author_id.ok_or_else(|| AppError::NotFound("comment not found".to_string()))?;
    if author_id != requester_id && !requester_is_instructor {
        return Err(AppError::Permission(
            "comments can only be deleted by their author or an instructor".to_string(),
        ));
    }
    let files: Vec<String> = sqlx::query_scalar(
        "WITH RECURSIVE subtree (id) AS ( \
             SELECT id FROM assignment_comment WHERE id = ? \
             UNION ALL \
             SELECT ac.id FROM assignment_comment ac JOIN subtree s ON ac.parent_id = s.id \
         ) \
         SELECT file_url FROM assignment_comment \
         WHERE id IN (SELECT id FROM subtree) AND file_url IS NOT NULL",
    )
    .bind(comment_id)
    .fetch_all(db)
    .await?;
    sqlx::query("DELETE FROM assignment_comment WHERE id = ?")
        .bind(comment_id)
        .execute(db)
        .await?;
    for object in files {
        storage.delete(&object).await;
    }
    Ok(())
}
