use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde_json::json;

use crate::{
    auth::{self, AuthUser},
    courses::{
        self, ChapterOut, LectureDetailOut, StudentLecturesOut,
        progress::{self, ProgressInput, ProgressOut},
    },
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lecture/", get(my_lectures))
        .route("/lecture/{lecture_id}/", get(lecture_detail))
        .route("/lecture_chapter/{lecture_id}/", get(lecture_chapters))
        .route("/chapter_video/{chapter_video_id}/", get(chapter_video))
        .route("/chapter_video/{chapter_video_id}/state/", get(progress_state))
        .route(
            "/chapter_video/{chapter_video_id}/progress/",
            post(create_progress),
        )
        .route(
            "/chapter_video/{chapter_video_id}/progress/update/",
            patch(update_progress),
        )
}

/// Playback URLs are only handed out to the configured frontends; an empty
/// list allows any origin, for development.
fn ensure_allowed_referrer(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let allowed = &state.config.allowed_referrers;
    if allowed.is_empty() {
        return Ok(());
    }
    let referrer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if allowed.iter().any(|prefix| referrer.starts_with(prefix)) {
        return Ok(());
    }
    Err(AppError::Permission("referrer is not allowed".to_string()))
}

async fn lecture_course_or_404(state: &AppState, lecture_id: i64) -> Result<i64, AppError> {
    courses::lecture_course_id(&state.db, lecture_id)
        .await?
        .ok_or_else(|| AppError::NotFound("lecture not found".to_string()))
}

async fn video_course_or_404(state: &AppState, video_id: i64) -> Result<i64, AppError> {
    courses::video_course_id(&state.db, video_id)
        .await?
        .ok_or_else(|| AppError::NotFound("video not found".to_string()))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/lecture/",
    method(get),
    responses(
        (status = 200, description = "Enrolled lectures with progress rates", body = StudentLecturesOut),
        (status = 302, description = "No approved enrollment yet, body carries the landing page url"),
        (status = 403, description = "Caller is not a student")
    )
)]
pub async fn my_lectures(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, AppError> {
    let student_id = auth::require_student(&auth)?;
    let out = courses::student_lectures(&state.db, &state.cache, student_id).await?;
    if out.lectures.is_empty() {
        return Ok((
            StatusCode::FOUND,
            Json(json!({ "redirect_url": state.config.landing_url })),
        )
            .into_response());
    }
    Ok(Json(out).into_response())
}

#[utoipa::path(
    context_path = "/courses",
    path = "/lecture/{lecture_id}/",
    method(get),
    params(
        ("lecture_id" = i64, Path, description = "ID of the lecture")
    ),
    responses(
        (status = 200, description = "Lecture detail with its instructor", body = LectureDetailOut),
        (status = 403, description = "Not enrolled in the lecture's course"),
        (status = 404, description = "Lecture not found")
    )
)]
pub async fn lecture_detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(lecture_id): Path<i64>,
) -> Result<Json<LectureDetailOut>, AppError> {
    let course_id = lecture_course_or_404(&state, lecture_id).await?;
    auth::require_instructor_or_enrolled(&state.db, &auth, course_id).await?;
    Ok(Json(courses::lecture_detail(&state.db, lecture_id).await?))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/lecture_chapter/{lecture_id}/",
    method(get),
    params(
        ("lecture_id" = i64, Path, description = "ID of the lecture")
    ),
    responses(
        (status = 200, description = "Chapters with their video titles", body = Vec<ChapterOut>),
        (status = 403, description = "Not enrolled in the lecture's course"),
        (status = 404, description = "Lecture unknown or has no chapters")
    )
)]
pub async fn lecture_chapters(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(lecture_id): Path<i64>,
) -> Result<Json<Vec<ChapterOut>>, AppError> {
    let course_id = lecture_course_or_404(&state, lecture_id).await?;
    auth::require_instructor_or_enrolled(&state.db, &auth, course_id).await?;
    Ok(Json(
        courses::list_lecture_chapters(&state.db, &state.cache, lecture_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/chapter_video/{chapter_video_id}/",
    method(get),
    params(
        ("chapter_video_id" = i64, Path, description = "ID of the chapter video")
    ),
    responses(
        (status = 200, description = "Short-lived signed playback url"),
        (status = 403, description = "Referrer not allowed or not enrolled"),
        (status = 404, description = "Video not found or has no source file")
    )
)]
pub async fn chapter_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: AuthUser,
    Path(chapter_video_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    ensure_allowed_referrer(&state, &headers)?;
    let course_id = video_course_or_404(&state, chapter_video_id).await?;
    auth::require_instructor_or_enrolled(&state.db, &auth, course_id).await?;
    let url =
        courses::video_playback_url(&state.db, &state.cache, &state.storage, chapter_video_id)
            .await?;
    Ok(Json(json!({ "id": chapter_video_id, "video_url": url })))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/chapter_video/{chapter_video_id}/state/",
    method(get),
    params(
        ("chapter_video_id" = i64, Path, description = "ID of the chapter video")
    ),
    responses(
        (status = 200, description = "Current watch progress", body = ProgressOut),
        (status = 403, description = "Not an enrolled student"),
        (status = 404, description = "Video or progress record not found")
    )
)]
pub async fn progress_state(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chapter_video_id): Path<i64>,
) -> Result<Json<ProgressOut>, AppError> {
    let course_id = video_course_or_404(&state, chapter_video_id).await?;
    let student_id = auth::require_enrolled_student(&state.db, &auth, course_id).await?;
    Ok(Json(
        progress::get_state(&state.db, student_id, chapter_video_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/chapter_video/{chapter_video_id}/progress/",
    method(post),
    request_body = ProgressInput,
    params(
        ("chapter_video_id" = i64, Path, description = "ID of the chapter video")
    ),
    responses(
        (status = 201, description = "Tracking started", body = ProgressOut),
        (status = 200, description = "A record already existed and is returned untouched", body = ProgressOut),
        (status = 400, description = "Invalid watch data"),
        (status = 403, description = "Not an enrolled student"),
        (status = 404, description = "Video not found")
    )
)]
pub async fn create_progress(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chapter_video_id): Path<i64>,
    Json(input): Json<ProgressInput>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = video_course_or_404(&state, chapter_video_id).await?;
    let student_id = auth::require_enrolled_student(&state.db, &auth, course_id).await?;
    let (out, created) =
        progress::record(&state.db, &state.cache, student_id, chapter_video_id, input).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(out)))
}

#[utoipa::path(
    context_path = "/courses",
    path = "/chapter_video/{chapter_video_id}/progress/update/",
    method(patch),
    request_body = ProgressInput,
    params(
        ("chapter_video_id" = i64, Path, description = "ID of the chapter video")
    ),
    responses(
        (status = 200, description = "Progress overwritten", body = ProgressOut),
        (status = 400, description = "Invalid watch data"),
        (status = 403, description = "Not an enrolled student"),
        (status = 404, description = "No progress record to update")
    )
)]
pub async fn update_progress(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(chapter_video_id): Path<i64>,
    Json(input): Json<ProgressInput>,
) -> Result<Json<ProgressOut>, AppError> {
    let course_id = video_course_or_404(&state, chapter_video_id).await?;
    let student_id = auth::require_enrolled_student(&state.db, &auth, course_id).await?;
    Ok(Json(
        progress::update(&state.db, &state.cache, student_id, chapter_video_id, input).await?,
    ))
}
