use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::{
    assignments::{self, ChapterAssignmentsOut, CommentInput, CommentOut},
    auth::{self, AuthUser},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{lecture_chapter_id}/", get(chapter_assignments))
        .route(
            "/assignment-comment/{assignment_id}/",
            get(assignment_comments).post(submit_assignment_comment),
        )
}

#[utoipa::path(
    context_path = "/assignments",
    path = "/{lecture_chapter_id}/",
    method(get),
    params(
        ("lecture_chapter_id" = i64, Path, description = "ID of the lecture chapter")
    ),
    responses(
        (status = 200, description = "Assignments under the chapter's videos", body = ChapterAssignmentsOut),
        (status = 400, description = "Chapter id is not positive")
    )
)]
pub async fn chapter_assignments(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(lecture_chapter_id): Path<i64>,
) -> Result<Json<ChapterAssignmentsOut>, AppError> {
    Ok(Json(
        assignments::list_for_chapter(&state.db, &state.cache, lecture_chapter_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/assignments",
    path = "/assignment-comment/{assignment_id}/",
    method(get),
    params(
        ("assignment_id" = i64, Path, description = "ID of the assignment")
    ),
    responses(
        (status = 200, description = "Submissions with their feedback threads", body = Vec<CommentOut>),
        (status = 403, description = "Not enrolled in the assignment's course"),
        (status = 404, description = "Assignment not found")
    )
)]
pub async fn assignment_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(assignment_id): Path<i64>,
) -> Result<Json<Vec<CommentOut>>, AppError> {
    ensure_assignment_access(&state, &auth, assignment_id).await?;
    Ok(Json(
        assignments::list_comments(&state.db, assignment_id, auth.user.id, auth.is_instructor())
            .await?,
    ))
}

#[utoipa::path(
    context_path = "/assignments",
    path = "/assignment-comment/{assignment_id}/",
    method(post),
    request_body = CommentInput,
    params(
        ("assignment_id" = i64, Path, description = "ID of the assignment")
    ),
    responses(
        (status = 201, description = "Submission or feedback recorded"),
        (status = 400, description = "Empty content"),
        (status = 403, description = "Reply from a non-instructor, or not enrolled"),
        (status = 404, description = "Assignment or parent comment not found")
    )
)]
pub async fn submit_assignment_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(assignment_id): Path<i64>,
    Json(input): Json<CommentInput>,
) -> Result<impl IntoResponse, AppError> {
    ensure_assignment_access(&state, &auth, assignment_id).await?;
    assignments::submit_comment(
        &state.db,
        assignment_id,
        auth.user.id,
        auth.is_instructor(),
        input,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "detail": "assignment submitted" })),
    ))
}

async fn ensure_assignment_access(
    state: &AppState,
    auth: &AuthUser,
    assignment_id: i64,
) -> Result<(), AppError> {
    let course_id = assignments::assignment_course_id(&state.db, assignment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("assignment not found".to_string()))?;
    auth::require_instructor_or_enrolled(&state.db, auth, course_id).await
}
