use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::AppError,
    state::AppState,
    terms::{self, Terms},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(active_terms))
}

#[utoipa::path(
    context_path = "/terms",
    path = "/",
    method(get),
    responses(
        (status = 200, description = "Terms documents shown at signup", body = Vec<Terms>)
    )
)]
pub async fn active_terms(State(state): State<AppState>) -> Result<Json<Vec<Terms>>, AppError> {
    Ok(Json(terms::list_active(&state.db).await?))
}
