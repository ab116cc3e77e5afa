use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::Config;
use crate::cors::{self, CorsHeaders};
use crate::handlers;
use crate::storage::ImageStore;

/// Room for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ImageStore>,
}

impl AppState {
    pub fn new(config: Config, store: impl ImageStore) -> Self {
        AppState {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }
}

pub fn router(state: AppState) -> anyhow::Result<Router> {
    let cors_headers = CorsHeaders::new(&state.config.allowed_origin)
        .with_context(|| format!("invalid allowed origin {:?}", state.config.allowed_origin))?;
    // backstop only; the image and the other fields are each capped in the handler
    let body_limit = usize::try_from(
        state
            .config
            .max_upload_bytes
            .saturating_mul(2)
            .saturating_add(handlers::FORM_FIELDS_LIMIT),
    )
    .context("max upload size does not fit in memory")?
    .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/images", get(handlers::list_images))
        .route("/upload", post(handlers::upload_image))
        .layer(DefaultBodyLimit::max(body_limit));

    let images = ServeDir::new(&state.config.upload_dir);

    Ok(Router::new()
        .nest("/api", api)
        .nest_service("/images", images)
        .route("/healthz", get(handlers::healthz))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(cors_headers, cors::cors))
        .layer(TraceLayer::new_for_http()))
}
