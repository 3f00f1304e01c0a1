//! Token check for the probe endpoints.
//!
//! Probes write to the shared database and upload directory, so they only
//! run when the caller presents the configured token. The check runs before
//! the handler, which keeps a rejected request free of side effects.

use crate::server::ServerState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub async fn require_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(state.auth.header.as_str())
        .and_then(|value| value.to_str().ok());

    let rejection = match (state.auth.token(), presented) {
        (None, _) => Some("no token configured"),
        (Some(expected), Some(token)) if tokens_match(token, expected) => None,
        (Some(_), Some(_)) => Some("invalid token"),
        (Some(_), None) => Some("missing token header"),
    };

    if let Some(reason) = rejection {
        tracing::warn!(
            "Rejected {} {}: {} ({})",
            request.method(),
            request.uri().path(),
            reason,
            state.auth.header
        );
        return bad_token();
    }

    next.run(request).await
}

/// Compares digests so the comparison time does not depend on how many
/// leading bytes of the raw token are correct.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = hex::encode(Sha256::digest(presented.as_bytes()));
    let expected = hex::encode(Sha256::digest(expected.as_bytes()));
    presented == expected
}

fn bad_token() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "ok": false, "error": "bad_token" })),
    )
        .into_response()
}
