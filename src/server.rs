use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{api, state::AppState};

/// Full application router: one nested scope per app area, swagger on the
/// side, shared layers around everything.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
        .nest("/users", api::users::router())
        .nest("/courses", api::courses::router())
        .nest("/assignments", api::assignments::router())
        .nest("/registrations", api::registrations::router())
        .nest("/reviews", api::reviews::router())
        .nest("/terms", api::terms::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(CorsLayer::permissive())
                .layer(CookieManagerLayer::new()),
        )
        .with_state(state)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{addr}");
    tracing::info!("swagger ui at http://{addr}/swagger-ui");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
