use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    auth::{self, AuthUser},
    error::AppError,
    registrations::{self, EnrollmentOut},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enrollment/{course_id}/", post(enroll))
        .route("/enrollment/in-progress", get(enrollments_in_progress))
}

#[utoipa::path(
    context_path = "/registrations",
    path = "/enrollment/{course_id}/",
    method(post),
    params(
        ("course_id" = i64, Path, description = "ID of the course to apply for")
    ),
    responses(
        (status = 201, description = "Application recorded, awaiting approval", body = EnrollmentOut),
        (status = 400, description = "Already applied for this course"),
        (status = 403, description = "Caller is not a student"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn enroll(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = auth::require_student(&auth)?;
    let enrollment = registrations::apply(&state.db, student_id, course_id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

#[utoipa::path(
    context_path = "/registrations",
    path = "/enrollment/in-progress",
    method(get),
    responses(
        (status = 200, description = "Courses the student is actively enrolled in", body = Vec<EnrollmentOut>),
        (status = 403, description = "Caller is not a student"),
        (status = 404, description = "Nothing in progress")
    )
)]
pub async fn enrollments_in_progress(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<EnrollmentOut>>, AppError> {
    let student_id = auth::require_student(&auth)?;
    Ok(Json(registrations::in_progress(&state.db, student_id).await?))
}
