//! HTTP API.

pub mod error;
pub mod extract;
mod routes;

use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::engine::EngineHandle;
use crate::retrain::RetrainRunner;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use forgery_store::Store;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub engine: EngineHandle,
    pub tokens: Arc<TokenIssuer>,
    pub retrain: RetrainRunner,
    pub config: Arc<Config>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Build the router. Collection routes answer with and without the
/// trailing slash.
pub fn build_app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(routes::health::health))
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/demo", post(routes::auth::demo))
        .route("/uploads", post(routes::uploads::create).get(routes::uploads::list))
        .route("/uploads/", post(routes::uploads::create).get(routes::uploads::list))
        .route("/predictions", post(routes::predictions::create))
        .route("/predictions/", post(routes::predictions::create))
        .route("/predictions/:upload_id", get(routes::predictions::list_for_upload))
        .route("/history", get(routes::history::history))
        .route("/admin/metrics", get(routes::admin::metrics))
        .route("/admin/retrain", post(routes::admin::retrain));

    // Unauthenticated: anyone who knows a path can fetch the uploaded card
    // images. Turn off with FORGERY_SERVE_FILES=false outside local demos.
    if state.config.serve_files {
        router = router.nest_service("/files", ServeDir::new(&state.config.storage_dir));
    } else {
        tracing::info!("static /files route disabled");
    }

    // Same order as a ServiceBuilder stack (CORS outermost, body limit
    // innermost); layering on the Router lets axum box the response body
    // between layers, which CorsLayer needs (`ResBody: Default`).
    let cors = cors_layer(&state.config.cors_origins);
    router
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
