use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

/// Builds the HTTP application.
///
/// Layers, outermost first: request logging, signature check (sees the body
/// as sent on the wire), response compression, request decompression.
pub fn build_http_app(state: AppState) -> Router {
    api::metric_routes()
        .with_state(state.clone())
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(
            state,
            crate::middleware::verify_signature,
        ))
        .layer(middleware::from_fn(logging::request_logging))
}
