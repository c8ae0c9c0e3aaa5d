use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::rate_limit;
use crate::search;
use crate::ssrf;
use crate::{analyze, search::RefreshOutcome};

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub from: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub file_uri: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn search(Json(req): Json<SearchRequest>) -> Response {
    let query = match req.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => q.to_string(),
        None => return json_error(StatusCode::BAD_REQUEST, "query is required"),
    };
    if !rate_limit::allow("search") {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }

    let from = req.from.unwrap_or(0);
    let size = req.size.unwrap_or(10).min(search::MAX_PAGE_SIZE);
    match search::handle_search_query(&query, from, size).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => {
            error!("search exhausted retries: {e:#}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn analyze(Json(req): Json<AnalyzeRequest>) -> Response {
    let file_uri = match req.file_uri.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => u.to_string(),
        None => return json_error(StatusCode::BAD_REQUEST, "fileUri is required"),
    };

    // Validation happens before any browser work; a rejected URL never
    // reaches a navigation.
    let safe_url = match ssrf::build_safe_justice_gov_url(&file_uri) {
        Ok(safe) => safe,
        Err(rejection) => return json_error(rejection.status(), &rejection.to_string()),
    };

    if !rate_limit::allow("analyze") {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }

    match analyze::handle_analyze(&safe_url).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            error!("analyze failed: {e:#}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn refresh() -> Response {
    if !rate_limit::allow("refresh") {
        return json_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
    }

    let outcome = search::run_refresh().await;
    let status = if outcome.first_batch_failed {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(refresh_body(&outcome))).into_response()
}

fn refresh_body(outcome: &RefreshOutcome) -> serde_json::Value {
    let mut body = json!({
        "total": outcome.total,
        "documents": outcome.documents,
        "batches": outcome.batches,
    });
    if let Some(error) = &outcome.error {
        body["error"] = json!(error);
    }
    body
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_body_includes_error_only_on_failure() {
        let clean = RefreshOutcome {
            total: 2,
            documents: vec![json!({"id": 1}), json!({"id": 2})],
            batches: 1,
            error: None,
            first_batch_failed: false,
        };
        let body = refresh_body(&clean);
        assert_eq!(body["total"], 2);
        assert_eq!(body["batches"], 1);
        assert!(body.get("error").is_none());

        let partial = RefreshOutcome {
            total: 200,
            documents: vec![json!({"id": 1})],
            batches: 1,
            error: Some("target returned 403 Forbidden".to_string()),
            first_batch_failed: false,
        };
        let body = refresh_body(&partial);
        assert_eq!(body["documents"].as_array().unwrap().len(), 1);
        assert!(body["error"].as_str().unwrap().contains("403"));
    }
}
