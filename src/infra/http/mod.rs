mod handlers;
mod middleware;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::generator::PdfGenerator;

use middleware::{log_responses, set_request_context};

pub use handlers::PdfRequest;

#[derive(Clone)]
pub struct HttpState {
    pub generator: PdfGenerator,
}

pub fn build_router(state: HttpState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/pdf", post(handlers::render_pdf))
        .route("/_health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
