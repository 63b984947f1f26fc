//! Shared fixtures for the unit tests: an in-memory database with the real
//! schema applied, plus row builders for the common entities.

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

use crate::{
    cache::Cache,
    config::{ServerConfig, StorageConfig},
    state::AppState,
    storage::StorageClient,
    users::User,
    utils::now_utc,
};

/// Fresh in-memory database. A single connection keeps every query in the
/// test on the same memory instance.
pub(crate) async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub(crate) fn config() -> ServerConfig {
    ServerConfig {
        jwt_secret: "test-secret".to_string(),
        ..ServerConfig::default()
    }
}

pub(crate) fn storage() -> StorageClient {
    StorageClient::new(&StorageConfig::default())
}

/// Full application state over the in-memory database and cache, for tests
/// that go through the router.
pub(crate) async fn state() -> AppState {
    AppState::new(pool().await, Cache::memory(), config())
}

/// User row with a placeholder password hash; name/nickname come from the
/// address's local part, the unique phone slot holds the address itself.
pub(crate) async fn user(db: &SqlitePool, email: &str, is_staff: bool) -> User {
    let nickname = email.split('@').next().unwrap_or(email);
    let now = now_utc();
    let id = sqlx::query(
        "INSERT INTO user \
         (email, password, name, nickname, phone_number, is_active, is_staff, created_at, updated_at) \
         VALUES (?, '!', ?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(email)
    .bind(nickname)
    .bind(nickname)
    .bind(email)
    .bind(is_staff)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid();
    sqlx::query_as::<_, User>("SELECT * FROM user WHERE id = ?")
        .bind(id)
        .fetch_one(db)
        .await
        .unwrap()
}

pub(crate) async fn student(db: &SqlitePool, user_id: i64) -> i64 {
    sqlx::query("INSERT INTO student (user_id, created_at) VALUES (?, ?)")
        .bind(user_id)
        .bind(now_utc())
        .execute(db)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub(crate) async fn instructor(db: &SqlitePool, user_id: i64) -> i64 {
    sqlx::query("INSERT INTO instructor (user_id, experience, created_at) VALUES (?, 'veteran', ?)")
        .bind(user_id)
        .bind(now_utc())
        .execute(db)
        .await
        .unwrap()
        .last_insert_rowid()
}

pub(crate) async fn course(db: &SqlitePool, title: &str) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO course (title, price, total_duration, max_students, created_at, updated_at) \
         VALUES (?, 49000.0, 3600, 30, ?, ?)",
    )
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn lecture(
    db: &SqlitePool,
    course_id: i64,
    instructor_id: Option<i64>,
    title: &str,
) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO lecture \
         (course_id, instructor_id, title, thumbnail, introduction, learning_objective, created_at, updated_at) \
         VALUES (?, ?, ?, NULL, '', '', ?, ?)",
    )
    .bind(course_id)
    .bind(instructor_id)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn chapter(db: &SqlitePool, lecture_id: i64, title: &str) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO lecture_chapter (lecture_id, title, material_url, created_at, updated_at) \
         VALUES (?, ?, NULL, ?, ?)",
    )
    .bind(lecture_id)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn video(db: &SqlitePool, chapter_id: i64, title: &str) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO chapter_video (lecture_chapter_id, title, video_url, created_at, updated_at) \
         VALUES (?, ?, NULL, ?, ?)",
    )
    .bind(chapter_id)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn video_with_url(
    db: &SqlitePool,
    chapter_id: i64,
    title: &str,
    video_url: &str,
) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO chapter_video (lecture_chapter_id, title, video_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(chapter_id)
    .bind(title)
    .bind(video_url)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn enrollment(
    db: &SqlitePool,
    student_id: i64,
    course_id: i64,
    is_active: bool,
) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO enrollment (course_id, student_id, is_active, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(student_id)
    .bind(is_active)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub(crate) async fn completed_progress(db: &SqlitePool, student_id: i64, video_id: i64) -> i64 {
    let now = now_utc();
    sqlx::query(
        "INSERT INTO progress_tracking \
         (student_id, chapter_video_id, progress, is_completed, last_watched_time, created_at, updated_at) \
         VALUES (?, ?, 100.0, 1, 3600.0, ?, ?)",
    )
    .bind(student_id)
    .bind(video_id)
    .bind(now)
    .bind(now)
    .execute(db)
    .await
    .unwrap()
    .last_insert_rowid()
}
