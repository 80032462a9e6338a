use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use pulsemon_common::signing;

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

/// Lowercase form of the `HashSHA256` header, as stored in a `HeaderMap`.
static SIGNATURE_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

/// Largest request body accepted for signature checking.
const MAX_SIGNED_BODY: usize = 16 * 1024 * 1024;

/// Middleware that enforces the `HashSHA256` body signature.
///
/// Without a configured secret every request passes untouched. With one,
/// any request carrying a body must present the hex HMAC-SHA256 of the body
/// exactly as received (before decompression), otherwise it is rejected
/// with 400 before reaching a handler. Responses are signed the same way.
pub async fn verify_signature(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(secret) = state.secret.clone() else {
        return next.run(req).await;
    };

    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request body could not be read");
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                "request body could not be read",
            );
        }
    };

    if !bytes.is_empty() {
        let header = parts
            .headers
            .get(&SIGNATURE_HEADER_NAME)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = signing::verify(&secret, &bytes, header) {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: bad signature");
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "invalid_signature",
                &e.to_string(),
            );
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    sign_response(&secret, response).await
}

async fn sign_response(secret: &str, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Response body could not be read for signing");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "",
                "internal_error",
                "response could not be signed",
            );
        }
    };
    if let Ok(val) = HeaderValue::from_str(&signing::sign(secret, &bytes)) {
        parts.headers.insert(SIGNATURE_HEADER_NAME.clone(), val);
    }
    Response::from_parts(parts, Body::from(bytes))
}
