use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::error;

use crate::config::CONFIG;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-worker-signature";

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// HMAC-SHA256 over the exact serialized request body, hex-encoded.
pub fn compute_worker_signature(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time signature check via `Mac::verify_slice`. Anything that is
/// not well-formed hex of the right width is a clean false, never an error.
pub fn verify_worker_signature(body: &[u8], secret: &str, provided: &str) -> bool {
    let decoded = match hex::decode(provided) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    if decoded.len() != 32 {
        return false;
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    mac.verify_slice(&decoded).is_ok()
}

/// Pulls the signature out of the request. The dedicated header wins over the
/// bearer-token form when both are present.
pub fn extract_signature(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SIGNATURE_HEADER) {
        return value.to_str().ok().map(|s| s.trim().to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
}

/// axum layer for the signed routes. Buffers the body, verifies the HMAC,
/// then hands an identical request to the inner handler.
pub async fn require_signature(req: Request, next: Next) -> Response {
    let secret = CONFIG.shared_secret.as_str();
    if secret.is_empty() {
        error!("WORKER_SHARED_SECRET is not configured");
        return auth_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "worker shared secret is not configured",
        );
    }

    let provided = match extract_signature(req.headers()) {
        Some(sig) => sig,
        None => return auth_error(StatusCode::UNAUTHORIZED, "missing request signature"),
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return auth_error(StatusCode::BAD_REQUEST, "unreadable request body"),
    };

    if !verify_worker_signature(&bytes, secret, &provided) {
        return auth_error(StatusCode::FORBIDDEN, "invalid request signature");
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

fn auth_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
