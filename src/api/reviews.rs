use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::{
    auth::{self, AuthUser},
    courses,
    error::AppError,
    reviews::{self, MyReviewOut, ReviewInput, ReviewOut},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    // Static segment wins over the parameter, so "/my/" never captures.
    Router::new()
        .route("/{lecture_id}/", get(lecture_reviews).post(create_review))
        .route("/my/", get(my_reviews))
}

#[utoipa::path(
    context_path = "/reviews",
    path = "/{lecture_id}/",
    method(get),
    params(
        ("lecture_id" = i64, Path, description = "ID of the lecture")
    ),
    responses(
        (status = 200, description = "Reviews of the lecture, newest first", body = Vec<ReviewOut>),
        (status = 404, description = "No reviews yet")
    )
)]
pub async fn lecture_reviews(
    State(state): State<AppState>,
    Path(lecture_id): Path<i64>,
) -> Result<Json<Vec<ReviewOut>>, AppError> {
    Ok(Json(reviews::list_for_lecture(&state.db, lecture_id).await?))
}

#[utoipa::path(
    context_path = "/reviews",
    path = "/{lecture_id}/",
    method(post),
    request_body = ReviewInput,
    params(
        ("lecture_id" = i64, Path, description = "ID of the lecture")
    ),
    responses(
        (status = 201, description = "Review recorded", body = ReviewOut),
        (status = 400, description = "Invalid rating or a second review of the same lecture"),
        (status = 403, description = "Not enrolled in the lecture's course"),
        (status = 404, description = "Lecture not found")
    )
)]
pub async fn create_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(lecture_id): Path<i64>,
    Json(input): Json<ReviewInput>,
) -> Result<impl IntoResponse, AppError> {
    let course_id = courses::lecture_course_id(&state.db, lecture_id)
        .await?
        .ok_or_else(|| AppError::NotFound("lecture not found".to_string()))?;
    let student_id = auth::require_enrolled_student(&state.db, &auth, course_id).await?;
    let review = reviews::submit(&state.db, student_id, lecture_id, input).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

#[utoipa::path(
    context_path = "/reviews",
    path = "/my/",
    method(get),
    responses(
        (status = 200, description = "Reviews the student has written", body = Vec<MyReviewOut>),
        (status = 403, description = "Caller is not a student"),
        (status = 404, description = "No reviews written yet")
    )
)]
pub async fn my_reviews(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<MyReviewOut>>, AppError> {
    let student_id = auth::require_student(&auth)?;
    Ok(Json(reviews::my_reviews(&state.db, student_id).await?))
}
