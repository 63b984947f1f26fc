//! HTTP surface, one router module per app area. Handlers resolve the
//! caller's role, run the permission gates and translate domain errors into
//! status codes through [`crate::error::AppError`]; everything else lives in
//! the domain modules.

pub mod assignments;
pub mod courses;
pub mod registrations;
pub mod reviews;
pub mod terms;
pub mod users;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(paths(
    users::send_email_verification,
    users::verify_email_code,
    users::signup,
    users::login,
    users::token_refresh,
    users::logout,
    users::withdrawal,
    users::myinfo,
    users::update_myinfo,
    users::password_change,
    courses::my_lectures,
    courses::lecture_detail,
    courses::lecture_chapters,
    courses::chapter_video,
    courses::progress_state,
    courses::create_progress,
    courses::update_progress,
    assignments::chapter_assignments,
    assignments::assignment_comments,
    assignments::submit_assignment_comment,
    registrations::enroll,
    registrations::enrollments_in_progress,
    reviews::lecture_reviews,
    reviews::create_review,
    reviews::my_reviews,
    terms::active_terms,
))]
pub struct ApiDoc;

pub fn get_openapi_json() -> String {
    ApiDoc::openapi()
        .to_pretty_json()
        .expect("openapi document serializes")
}
