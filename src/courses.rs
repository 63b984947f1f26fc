//! Course catalog: courses, lectures, chapters and videos, plus the cached
//! read models built from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, prelude::FromRow};
use utoipa::ToSchema;

use crate::{
    cache::{Cache, LISTING_TTL, SIGNED_URL_TTL, STUDENT_LECTURES_TTL, keys},
    error::AppError,
    storage::StorageClient,
    utils::{now_utc, round2},
};

pub mod progress;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CourseOut {
    pub id: i64,
    pub title: String,
    pub price: f64,
    pub total_duration: i64,
    pub max_students: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstructorOut {
    pub id: i64,
    pub nickname: String,
    pub experience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LectureDetailOut {
    pub id: i64,
    pub title: String,
    pub thumbnail: Option<String>,
    pub introduction: String,
    pub learning_objective: String,
    pub instructor: Option<InstructorOut>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VideoTitleOut {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChapterOut {
    pub id: i64,
    pub lecture_id: i64,
    pub title: String,
    pub material_url: Option<String>,
    pub chapter_video_titles: Vec<VideoTitleOut>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LectureProgressOut {
    pub id: i64,
    pub title: String,
    pub thumbnail: Option<String>,
    pub progress_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StudentLecturesOut {
    pub student_id: i64,
    pub lectures: Vec<LectureProgressOut>,
}

pub async fn list_courses(db: &SqlitePool) -> Result<Vec<CourseOut>, AppError> {
    let courses = sqlx::query_as::<_, CourseOut>(
        "SELECT id, title, price, total_duration, max_students FROM course ORDER BY id",
    )
    .fetch_all(db)
    .await?;
    Ok(courses)
}

pub async fn course_exists(db: &SqlitePool, course_id: i64) -> Result<bool, AppError> {
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM course WHERE id = ?")
        .bind(course_id)
        .fetch_one(db)
        .await?;
    Ok(found > 0)
}

pub async fn create_course(
    db: &SqlitePool,
    title: &str,
    price: f64,
    total_duration: i64,
    max_students: i64,
) -> Result<i64, AppError> {
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO course (title, price, total_duration, max_students, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(title)
    .bind(price)
    .bind(total_duration)
    .bind(max_students)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn create_lecture(
    db: &SqlitePool,
    course_id: i64,
    instructor_id: Option<i64>,
    title: &str,
    thumbnail: Option<&str>,
    introduction: &str,
    learning_objective: &str,
) -> Result<i64, AppError> {
    if !course_exists(db, course_id).await? {
        return Err(AppError::NotFound("course not found".to_string()));
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO lecture \
         (course_id, instructor_id, title, thumbnail, introduction, learning_objective, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(instructor_id)
    .bind(title)
    .bind(thumbnail)
    .bind(introduction)
    .bind(learning_objective)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    Ok(id)
}

#[derive(FromRow)]
struct LectureRow {
    id: i64,
    title: String,
    thumbnail: Option<String>,
    introduction: String,
    learning_objective: String,
    instructor_id: Option<i64>,
}

pub async fn lecture_detail(db: &SqlitePool, lecture_id: i64) -> Result<LectureDetailOut, AppError> {
    let lecture = sqlx::query_as::<_, LectureRow>(
        "SELECT id, title, thumbnail, introduction, learning_objective, instructor_id \
         FROM lecture WHERE id = ?",
    )
    .bind(lecture_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("lecture not found".to_string()))?;
    let instructor = match lecture.instructor_id {
        Some(instructor_id) => sqlx::query_as::<_, (i64, String, Option<String>)>(
            "SELECT i.id, u.nickname, i.experience FROM instructor i \
             JOIN user u ON i.user_id = u.id WHERE i.id = ?",
        )
        .bind(instructor_id)
        .fetch_optional(db)
        .await?
        .map(|(id, nickname, experience)| InstructorOut { id, nickname, experience }),
        None => None,
    };
    Ok(LectureDetailOut {
        id: lecture.id,
        title: lecture.title,
        thumbnail: lecture.thumbnail,
        introduction: lecture.introduction,
        learning_objective: lecture.learning_objective,
        instructor,
    })
}

/// Update a lecture's catalog fields; absent fields keep their value. The
/// cached chapter listing is dropped with every lecture write, and a
/// replaced or cleared thumbnail is removed from storage.
pub async fn update_lecture(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    lecture_id: i64,
    title: Option<&str>,
    thumbnail: Option<Option<&str>>,
    introduction: Option<&str>,
    learning_objective: Option<&str>,
) -> Result<(), AppError> {
    let row: Option<(String, Option<String>, String, String)> = sqlx::query_as(
        "SELECT title, thumbnail, introduction, learning_objective FROM lecture WHERE id = ?",
    )
    .bind(lecture_id)
    .fetch_optional(db)
    .await?;
    let (old_title, old_thumbnail, old_introduction, old_objective) =
        row.ok_or_else(|| AppError::NotFound("lecture not found".to_string()))?;
    let new_thumbnail = match thumbnail {
        Some(thumbnail) => thumbnail.map(str::to_string),
        None => old_thumbnail.clone(),
    };
    sqlx::query(
        "UPDATE lecture SET title = ?, thumbnail = ?, introduction = ?, \
         learning_objective = ?, updated_at = ? WHERE id = ?",
    )
    .bind(title.map(str::to_string).unwrap_or(old_title))
    .bind(&new_thumbnail)
    .bind(introduction.map(str::to_string).unwrap_or(old_introduction))
    .bind(learning_objective.map(str::to_string).unwrap_or(old_objective))
    .bind(now_utc())
    .bind(lecture_id)
    .execute(db)
    .await?;
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    if let Some(old) = old_thumbnail {
        if new_thumbnail.as_deref() != Some(old.as_str()) {
            storage.delete(&old).await;
        }
    }
    Ok(())
}

/// Delete a lecture. Chapters, videos and progress rows cascade away; the
/// chapter listing and affected watchers' cached rates are dropped, and the
/// thumbnail is removed from storage.
pub async fn delete_lecture(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    lecture_id: i64,
) -> Result<(), AppError> {
    let thumbnail: Option<String> =
        sqlx::query_scalar("SELECT thumbnail FROM lecture WHERE id = ?")
            .bind(lecture_id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("lecture not found".to_string()))?;
    let video_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT cv.id FROM chapter_video cv \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
         WHERE lc.lecture_id = ?",
    )
    .bind(lecture_id)
    .fetch_all(db)
    .await?;
    let watchers: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT pt.student_id FROM progress_tracking pt \
         JOIN chapter_video cv ON pt.chapter_video_id = cv.id \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
         WHERE lc.lecture_id = ?",
    )
    .bind(lecture_id)
    .fetch_all(db)
    .await?;
    sqlx::query("DELETE FROM lecture WHERE id = ?")
        .bind(lecture_id)
        .execute(db)
        .await?;
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    for video_id in video_ids {
        cache.del(&keys::signed_url(video_id)).await?;
    }
    for student_id in watchers {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    if let Some(thumbnail) = thumbnail {
        storage.delete(&thumbnail).await;
    }
    Ok(())
}

async fn lecture_exists(db: &SqlitePool, lecture_id: i64) -> Result<bool, AppError> {
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lecture WHERE id = ?")
        .bind(lecture_id)
        .fetch_one(db)
        .await?;
    Ok(found > 0)
}

/// Course a lecture belongs to, for enrollment gates.
pub async fn lecture_course_id(db: &SqlitePool, lecture_id: i64) -> Result<Option<i64>, AppError> {
    let course_id: Option<i64> = sqlx::query_scalar("SELECT course_id FROM lecture WHERE id = ?")
        .bind(lecture_id)
        .fetch_optional(db)
        .await?;
    Ok(course_id)
}

/// Course a video belongs to, through its chapter and lecture.
pub async fn video_course_id(db: &SqlitePool, video_id: i64) -> Result<Option<i64>, AppError> {
    let course_id: Option<i64> = sqlx::query_scalar(
        "SELECT l.course_id FROM chapter_video cv \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
         JOIN lecture l ON lc.lecture_id = l.id WHERE cv.id = ?",
    )
    .bind(video_id)
    .fetch_optional(db)
    .await?;
    Ok(course_id)
}

/// Lecture id a chapter belongs to, for cache invalidation.
async fn chapter_lecture_id(db: &SqlitePool, chapter_id: i64) -> Result<Option<i64>, AppError> {
    let lecture_id: Option<i64> =
        sqlx::query_scalar("SELECT lecture_id FROM lecture_chapter WHERE id = ?")
            .bind(chapter_id)
            .fetch_optional(db)
            .await?;
    Ok(lecture_id)
}

/// Lecture id a video belongs to, through its chapter.
async fn video_lecture_id(db: &SqlitePool, video_id: i64) -> Result<Option<i64>, AppError> {
    let lecture_id: Option<i64> = sqlx::query_scalar(
        "SELECT lc.lecture_id FROM chapter_video cv \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id WHERE cv.id = ?",
    )
    .bind(video_id)
    .fetch_optional(db)
    .await?;
    Ok(lecture_id)
}

pub async fn create_chapter(
    db: &SqlitePool,
    cache: &Cache,
    lecture_id: i64,
    title: &str,
    material_url: Option<&str>,
) -> Result<i64, AppError> {
    if !lecture_exists(db, lecture_id).await? {
        return Err(AppError::NotFound("lecture not found".to_string()));
    }
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO lecture_chapter (lecture_id, title, material_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(lecture_id)
    .bind(title)
    .bind(material_url)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    Ok(id)
}

pub async fn create_video(
    db: &SqlitePool,
    cache: &Cache,
    chapter_id: i64,
    title: &str,
    video_url: Option<&str>,
) -> Result<i64, AppError> {
    let lecture_id = chapter_lecture_id(db, chapter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chapter not found".to_string()))?;
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO chapter_video (lecture_chapter_id, title, video_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(chapter_id)
    .bind(title)
    .bind(video_url)
    .bind(now)
    .bind(now)
    .execute(db)
    .await?
    .last_insert_rowid();
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    Ok(id)
}

/// Move a chapter under another lecture. Both lectures' cached chapter
/// listings are dropped, the old one before the write.
pub async fn move_chapter(
    db: &SqlitePool,
    cache: &Cache,
    chapter_id: i64,
    target_lecture_id: i64,
) -> Result<(), AppError> {
    let old_lecture_id = chapter_lecture_id(db, chapter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chapter not found".to_string()))?;
    if !lecture_exists(db, target_lecture_id).await? {
        return Err(AppError::NotFound("lecture not found".to_string()));
    }
    cache.del(&keys::lecture_chapters(old_lecture_id)).await?;
    sqlx::query("UPDATE lecture_chapter SET lecture_id = ?, updated_at = ? WHERE id = ?")
        .bind(target_lecture_id)
        .bind(now_utc())
        .bind(chapter_id)
        .execute(db)
        .await?;
    cache.del(&keys::lecture_chapters(target_lecture_id)).await?;
    Ok(())
}

/// Update a chapter's title or swap its material. The owning lecture's
/// chapter listing is dropped; a replaced or cleared material object is
/// removed from storage.
pub async fn update_chapter(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    chapter_id: i64,
    title: Option<&str>,
    material_url: Option<Option<&str>>,
) -> Result<(), AppError> {
    let lecture_id = chapter_lecture_id(db, chapter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chapter not found".to_string()))?;
    let (old_title, old_material): (String, Option<String>) =
        sqlx::query_as("SELECT title, material_url FROM lecture_chapter WHERE id = ?")
            .bind(chapter_id)
            .fetch_one(db)
            .await?;
    let new_material = match material_url {
        Some(material) => material.map(str::to_string),
        None => old_material.clone(),
    };
    sqlx::query(
        "UPDATE lecture_chapter SET title = ?, material_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(title.map(str::to_string).unwrap_or(old_title))
    .bind(&new_material)
    .bind(now_utc())
    .bind(chapter_id)
    .execute(db)
    .await?;
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    if let Some(old) = old_material {
        if new_material.as_deref() != Some(old.as_str()) {
            storage.delete(&old).await;
        }
    }
    Ok(())
}

/// Delete a chapter and the videos under it. The owning lecture's chapter
/// listing is dropped along with affected watchers' cached rates, and the
/// material is removed from storage.
pub async fn delete_chapter(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    chapter_id: i64,
) -> Result<(), AppError> {
    let lecture_id = chapter_lecture_id(db, chapter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chapter not found".to_string()))?;
    let material: Option<String> =
        sqlx::query_scalar("SELECT material_url FROM lecture_chapter WHERE id = ?")
            .bind(chapter_id)
            .fetch_one(db)
            .await?;
    let video_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM chapter_video WHERE lecture_chapter_id = ?")
            .bind(chapter_id)
            .fetch_all(db)
            .await?;
    let watchers: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT pt.student_id FROM progress_tracking pt \
         JOIN chapter_video cv ON pt.chapter_video_id = cv.id \
         WHERE cv.lecture_chapter_id = ?",
    )
    .bind(chapter_id)
    .fetch_all(db)
    .await?;
    sqlx::query("DELETE FROM lecture_chapter WHERE id = ?")
        .bind(chapter_id)
        .execute(db)
        .await?;
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    for video_id in video_ids {
        cache.del(&keys::signed_url(video_id)).await?;
    }
    for student_id in watchers {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    if let Some(material) = material {
        storage.delete(&material).await;
    }
    Ok(())
}

/// Move a video under another chapter. The old parent's chapter listing is
/// dropped from the cache before the write so it cannot survive the move,
/// then the new parent's listing is dropped as well.
pub async fn move_video(
    db: &SqlitePool,
    cache: &Cache,
    video_id: i64,
    target_chapter_id: i64,
) -> Result<(), AppError> {
    let old_lecture_id = video_lecture_id(db, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("video not found".to_string()))?;
    let new_lecture_id = chapter_lecture_id(db, target_chapter_id)
        .await?
        .ok_or_else(|| AppError::NotFound("chapter not found".to_string()))?;
    cache.del(&keys::lecture_chapters(old_lecture_id)).await?;
    sqlx::query("UPDATE chapter_video SET lecture_chapter_id = ?, updated_at = ? WHERE id = ?")
        .bind(target_chapter_id)
        .bind(now_utc())
        .bind(video_id)
        .execute(db)
        .await?;
    cache.del(&keys::lecture_chapters(new_lecture_id)).await?;
    Ok(())
}

pub async fn delete_video(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    video_id: i64,
) -> Result<(), AppError> {
    let lecture_id = video_lecture_id(db, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("video not found".to_string()))?;
    let object: Option<String> =
        sqlx::query_scalar("SELECT video_url FROM chapter_video WHERE id = ?")
            .bind(video_id)
            .fetch_one(db)
            .await?;
    // The cascade drops progress rows with the video, which shifts those
    // students' completion rates.
    let watchers: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT student_id FROM progress_tracking WHERE chapter_video_id = ?",
    )
    .bind(video_id)
    .fetch_all(db)
    .await?;
    sqlx::query("DELETE FROM chapter_video WHERE id = ?")
        .bind(video_id)
        .execute(db)
        .await?;
    cache.del(&keys::lecture_chapters(lecture_id)).await?;
    cache.del(&keys::signed_url(video_id)).await?;
    for student_id in watchers {
        cache.del(&keys::student_lectures(student_id)).await?;
    }
    if let Some(object) = object {
        storage.delete(&object).await;
    }
    Ok(())
}

/// Chapters of a lecture with their video titles, assembled from two queries
/// and cached as one listing. A lecture without chapters (or an unknown
/// lecture id) is a 404.
pub async fn list_lecture_chapters(
    db: &SqlitePool,
    cache: &Cache,
    lecture_id: i64,
) -> Result<Vec<ChapterOut>, AppError> {
    let cache_key = keys::lecture_chapters(lecture_id);
    if let Some(cached) = cache.get(&cache_key).await? {
        if let Ok(chapters) = serde_json::from_str::<Vec<ChapterOut>>(&cached) {
            return Ok(chapters);
        }
    }
    let chapter_rows = sqlx::query_as::<_, (i64, i64, String, Option<String>)>(
        "SELECT id, lecture_id, title, material_url FROM lecture_chapter \
         WHERE lecture_id = ? ORDER BY id",
    )
    .bind(lecture_id)
    .fetch_all(db)
    .await?;
    if chapter_rows.is_empty() {
        return Err(AppError::NotFound(
            "no chapters found for this lecture".to_string(),
        ));
    }
    let video_rows = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT cv.id, cv.lecture_chapter_id, cv.title FROM chapter_video cv \
         JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
         WHERE lc.lecture_id = ? ORDER BY cv.id",
    )
    .bind(lecture_id)
    .fetch_all(db)
    .await?;

    let mut videos_by_chapter: HashMap<i64, Vec<VideoTitleOut>> = HashMap::new();
    for (id, chapter_id, title) in video_rows {
        videos_by_chapter
            .entry(chapter_id)
            .or_default()
            .push(VideoTitleOut { id, title });
    }
    let chapters: Vec<ChapterOut> = chapter_rows
        .into_iter()
        .map(|(id, lecture_id, title, material_url)| ChapterOut {
            id,
            lecture_id,
            title,
            material_url,
            chapter_video_titles: videos_by_chapter.remove(&id).unwrap_or_default(),
        })
        .collect();

    cache
        .set_ex(
            &cache_key,
            &serde_json::to_string(&chapters).map_err(anyhow::Error::from)?,
            LISTING_TTL,
        )
        .await?;
    Ok(chapters)
}

#[derive(FromRow)]
struct LectureProgressRow {
    id: i64,
    title: String,
    thumbnail: Option<String>,
    total_videos: i64,
    completed_videos: i64,
}

/// Lectures the student can watch, with per-lecture completion rates. The
/// whole payload is cached per student and dropped whenever enrollments or
/// completion flags change.
pub async fn student_lectures(
    db: &SqlitePool,
    cache: &Cache,
    student_id: i64,
) -> Result<StudentLecturesOut, AppError> {
    let cache_key = keys::student_lectures(student_id);
    if let Some(cached) = cache.get(&cache_key).await? {
        if let Ok(out) = serde_json::from_str::<StudentLecturesOut>(&cached) {
            return Ok(out);
        }
    }
    let rows = sqlx::query_as::<_, LectureProgressRow>(
        "SELECT l.id, l.title, l.thumbnail, \
         (SELECT COUNT(*) FROM chapter_video cv \
          JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
          WHERE lc.lecture_id = l.id) AS total_videos, \
         (SELECT COUNT(*) FROM progress_tracking pt \
          JOIN chapter_video cv ON pt.chapter_video_id = cv.id \
          JOIN lecture_chapter lc ON cv.lecture_chapter_id = lc.id \
          WHERE lc.lecture_id = l.id AND pt.student_id = ? AND pt.is_completed = 1) \
          AS completed_videos \
         FROM lecture l \
         JOIN enrollment e ON e.course_id = l.course_id \
         WHERE e.student_id = ? AND e.is_active = 1 \
         ORDER BY l.id",
    )
    .bind(student_id)
    .bind(student_id)
    .fetch_all(db)
    .await?;
    let lectures = rows
        .into_iter()
        .map(|row| {
            let rate = if row.total_videos == 0 {
                0.0
            } else {
                round2(row.completed_videos as f64 / row.total_videos as f64 * 100.0)
            };
            LectureProgressOut {
                id: row.id,
                title: row.title,
                thumbnail: row.thumbnail,
                progress_rate: rate,
            }
        })
        .collect();
    let out = StudentLecturesOut { student_id, lectures };

    cache
        .set_ex(
            &cache_key,
            &serde_json::to_string(&out).map_err(anyhow::Error::from)?,
            STUDENT_LECTURES_TTL,
        )
        .await?;
    Ok(out)
}

/// Short-lived playback URL for a video, cached for exactly its lifetime so
/// concurrent viewers share one signature.
pub async fn video_playback_url(
    db: &SqlitePool,
    cache: &Cache,
    storage: &StorageClient,
    video_id: i64,
) -> Result<String, AppError> {
    let cache_key = keys::signed_url(video_id);
    if let Some(url) = cache.get(&cache_key).await? {
        return Ok(url);
    }
    let object: Option<String> =
        sqlx::query_scalar("SELECT video_url FROM chapter_video WHERE id = ?")
            .bind(video_id)
            .fetch_optional(db)
            .await?
            .ok_or_else(|| AppError::NotFound("video not found".to_string()))?;
    let object = object.ok_or_else(|| AppError::NotFound("video has no source file".to_string()))?;
    let url = storage.signed_url(&object, SIGNED_URL_TTL);
    cache.set_ex(&cache_key, &url, SIGNED_URL_TTL).await?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn chapter_listing_groups_videos_and_tracks_mutations() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = testing::lecture(&db, course_id, None, "Ownership").await;
        let ch1 = create_chapter(&db, &cache, lecture_id, "Basics", None).await.unwrap();
        let ch2 = create_chapter(&db, &cache, lecture_id, "Borrowing", Some("notes.pdf"))
            .await
            .unwrap();
        create_video(&db, &cache, ch1, "Moves", None).await.unwrap();
        create_video(&db, &cache, ch1, "Copies", None).await.unwrap();

        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].id, ch1);
        assert_eq!(chapters[0].chapter_video_titles.len(), 2);
        assert!(chapters[1].chapter_video_titles.is_empty());
        assert_eq!(chapters[1].material_url.as_deref(), Some("notes.pdf"));

        // The listing is cached now; a video insert must drop it.
        create_video(&db, &cache, ch2, "Lifetimes", None).await.unwrap();
        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters[1].chapter_video_titles.len(), 1);

        // A lecture with no chapters yet has nothing to list.
        let bare = testing::lecture(&db, course_id, None, "Planned").await;
        assert!(matches!(
            list_lecture_chapters(&db, &cache, bare).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn moving_a_video_refreshes_both_lectures() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_a = testing::lecture(&db, course_id, None, "A").await;
        let lecture_b = testing::lecture(&db, course_id, None, "B").await;
        let chapter_a = testing::chapter(&db, lecture_a, "a1").await;
        let chapter_b = testing::chapter(&db, lecture_b, "b1").await;
        let video_id = testing::video(&db, chapter_a, "clip").await;

        // Warm both cached listings.
        list_lecture_chapters(&db, &cache, lecture_a).await.unwrap();
        list_lecture_chapters(&db, &cache, lecture_b).await.unwrap();

        move_video(&db, &cache, video_id, chapter_b).await.unwrap();

        let a = list_lecture_chapters(&db, &cache, lecture_a).await.unwrap();
        assert!(a[0].chapter_video_titles.is_empty());
        let b = list_lecture_chapters(&db, &cache, lecture_b).await.unwrap();
        assert_eq!(b[0].chapter_video_titles.len(), 1);

        // Moving the whole chapter back empties lecture B again.
        move_chapter(&db, &cache, chapter_b, lecture_a).await.unwrap();
        assert!(matches!(
            list_lecture_chapters(&db, &cache, lecture_b).await,
            Err(AppError::NotFound(_))
        ));
        let a = list_lecture_chapters(&db, &cache, lecture_a).await.unwrap();
        assert_eq!(a.len(), 2);
        assert!(matches!(
            move_chapter(&db, &cache, chapter_a, 9999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lecture_detail_carries_instructor() {
        let db = testing::pool().await;
        let course_id = testing::course(&db, "Rust 101").await;
        let user = testing::user(&db, "teach@t.co", false).await;
        let instructor_id = testing::instructor(&db, user.id).await;
        let lecture_id =
            testing::lecture(&db, course_id, Some(instructor_id), "Ownership").await;

        let detail = lecture_detail(&db, lecture_id).await.unwrap();
        assert_eq!(detail.title, "Ownership");
        let instructor = detail.instructor.unwrap();
        assert_eq!(instructor.id, instructor_id);
        assert_eq!(instructor.nickname, "teach");

        assert!(matches!(
            lecture_detail(&db, 9999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn student_lectures_rate_is_completed_over_total() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = testing::lecture(&db, course_id, None, "Ownership").await;
        let chapter_id = testing::chapter(&db, lecture_id, "c1").await;
        let v1 = testing::video(&db, chapter_id, "one").await;
        let _v2 = testing::video(&db, chapter_id, "two").await;
        let _planned = testing::lecture(&db, course_id, None, "Planned").await;

        let user = testing::user(&db, "s@t.co", false).await;
        let student_id = testing::student(&db, user.id).await;
        testing::enrollment(&db, student_id, course_id, true).await;
        testing::completed_progress(&db, student_id, v1).await;

        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.student_id, student_id);
        assert_eq!(out.lectures.len(), 2);
        assert_eq!(out.lectures[0].progress_rate, 50.0);
        assert_eq!(out.lectures[1].progress_rate, 0.0);
    }

    #[tokio::test]
    async fn deleting_a_video_recomputes_watcher_rates() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let storage = testing::storage();
        let course_id = create_course(&db, "Rust 101", 49000.0, 3600, 30).await.unwrap();
        let user = testing::user(&db, "teach@t.co", false).await;
        let instructor_id = testing::instructor(&db, user.id).await;
        let lecture_id = create_lecture(
            &db,
            course_id,
            Some(instructor_id),
            "Ownership",
            None,
            "intro",
            "goals",
        )
        .await
        .unwrap();
        let chapter_id = create_chapter(&db, &cache, lecture_id, "c1", None).await.unwrap();
        let v1 = create_video(&db, &cache, chapter_id, "one", None).await.unwrap();
        create_video(&db, &cache, chapter_id, "two", None).await.unwrap();

        let courses = list_courses(&db).await.unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].title, "Rust 101");

        let watcher = testing::user(&db, "s@t.co", false).await;
        let student_id = testing::student(&db, watcher.id).await;
        testing::enrollment(&db, student_id, course_id, true).await;
        testing::completed_progress(&db, student_id, v1).await;

        // Warm the cached rate: one of two videos done.
        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.lectures[0].progress_rate, 50.0);

        delete_video(&db, &cache, &storage, v1).await.unwrap();

        // The watcher's cached payload went with the video.
        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.lectures[0].progress_rate, 0.0);

        assert!(matches!(
            delete_video(&db, &cache, &storage, 9999).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            create_lecture(&db, 9999, None, "x", None, "", "").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_chapter_routes_material_and_drops_caches() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let storage = testing::storage();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = testing::lecture(&db, course_id, None, "Ownership").await;
        let ch1 = create_chapter(&db, &cache, lecture_id, "Basics", Some("materials/basics.pdf"))
            .await
            .unwrap();
        let ch2 = create_chapter(&db, &cache, lecture_id, "Borrowing", None).await.unwrap();
        let v1 = create_video(&db, &cache, ch1, "clip", None).await.unwrap();
        let _keep = create_video(&db, &cache, ch2, "keep", None).await.unwrap();

        let user = testing::user(&db, "s@t.co", false).await;
        let student_id = testing::student(&db, user.id).await;
        testing::enrollment(&db, student_id, course_id, true).await;
        testing::completed_progress(&db, student_id, v1).await;

        // Warm both cached payloads.
        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters.len(), 2);
        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.lectures[0].progress_rate, 50.0);

        delete_chapter(&db, &cache, &storage, ch1).await.unwrap();

        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].id, ch2);
        // The watcher's progress rows went with the chapter's video.
        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.lectures[0].progress_rate, 0.0);
        assert_eq!(storage.deleted_objects(), ["materials/basics.pdf"]);

        assert!(matches!(
            delete_chapter(&db, &cache, &storage, ch1).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_lecture_routes_thumbnail_and_untracks_watchers() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let storage = testing::storage();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = create_lecture(
            &db,
            course_id,
            None,
            "Ownership",
            Some("thumbs/ownership.png"),
            "intro",
            "goals",
        )
        .await
        .unwrap();
        let chapter_id = create_chapter(&db, &cache, lecture_id, "c1", None).await.unwrap();
        let video_id = create_video(&db, &cache, chapter_id, "clip", None).await.unwrap();

        let user = testing::user(&db, "s@t.co", false).await;
        let student_id = testing::student(&db, user.id).await;
        testing::enrollment(&db, student_id, course_id, true).await;
        testing::completed_progress(&db, student_id, video_id).await;

        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert_eq!(out.lectures.len(), 1);
        assert_eq!(out.lectures[0].progress_rate, 100.0);

        delete_lecture(&db, &cache, &storage, lecture_id).await.unwrap();

        assert!(matches!(
            lecture_detail(&db, lecture_id).await,
            Err(AppError::NotFound(_))
        ));
        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert!(out.lectures.is_empty());
        assert_eq!(storage.deleted_objects(), ["thumbs/ownership.png"]);

        assert!(matches!(
            delete_lecture(&db, &cache, &storage, lecture_id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn metadata_updates_drop_the_chapter_listing() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let storage = testing::storage();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = testing::lecture(&db, course_id, None, "Ownership").await;
        let chapter_id = create_chapter(&db, &cache, lecture_id, "Basics", Some("materials/v1.pdf"))
            .await
            .unwrap();

        // Warm the listing, then retitle the chapter under it.
        list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        update_chapter(&db, &cache, &storage, chapter_id, Some("Foundations"), None)
            .await
            .unwrap();
        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters[0].title, "Foundations");
        assert_eq!(chapters[0].material_url.as_deref(), Some("materials/v1.pdf"));
        assert!(storage.deleted_objects().is_empty());

        // Swapping the material removes the replaced object.
        update_chapter(&db, &cache, &storage, chapter_id, None, Some(Some("materials/v2.pdf")))
            .await
            .unwrap();
        assert_eq!(storage.deleted_objects(), ["materials/v1.pdf"]);
        let chapters = list_lecture_chapters(&db, &cache, lecture_id).await.unwrap();
        assert_eq!(chapters[0].material_url.as_deref(), Some("materials/v2.pdf"));

        // A lecture write drops the listing as well.
        update_lecture(
            &db,
            &cache,
            &storage,
            lecture_id,
            Some("Ownership II"),
            None,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(!cache.exists(&keys::lecture_chapters(lecture_id)).await.unwrap());
        let detail = lecture_detail(&db, lecture_id).await.unwrap();
        assert_eq!(detail.title, "Ownership II");

        assert!(matches!(
            update_lecture(&db, &cache, &storage, 9999, None, None, None, None).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            update_chapter(&db, &cache, &storage, 9999, None, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn inactive_enrollment_lists_nothing() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let course_id = testing::course(&db, "Rust 101").await;
        testing::lecture(&db, course_id, None, "Ownership").await;
        let user = testing::user(&db, "s@t.co", false).await;
        let student_id = testing::student(&db, user.id).await;
        testing::enrollment(&db, student_id, course_id, false).await;

        let out = student_lectures(&db, &cache, student_id).await.unwrap();
        assert!(out.lectures.is_empty());
    }

    #[tokio::test]
    async fn playback_url_is_signed_and_cached() {
        let db = testing::pool().await;
        let cache = Cache::memory();
        let storage = testing::storage();
        let course_id = testing::course(&db, "Rust 101").await;
        let lecture_id = testing::lecture(&db, course_id, None, "Ownership").await;
        let chapter_id = testing::chapter(&db, lecture_id, "c1").await;
        let video_id = testing::video_with_url(&db, chapter_id, "clip", "videos/clip.mp4").await;

        let url = video_playback_url(&db, &cache, &storage, video_id).await.unwrap();
        assert!(url.contains("videos/clip.mp4"));
        assert!(url.contains("Signature="));
        let again = video_playback_url(&db, &cache, &storage, video_id).await.unwrap();
        assert_eq!(url, again);

        assert!(matches!(
            video_playback_url(&db, &cache, &storage, 9999).await,
            Err(AppError::NotFound(_))
        ));
        let bare = testing::video(&db, chapter_id, "no-source").await;
        assert!(matches!(
            video_playback_url(&db, &cache, &storage, bare).await,
            Err(AppError::NotFound(_))
        ));
    }
}
