use anyhow::{anyhow, Result};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::page_fetch::{self, PageFetch};
use crate::pool::{self, TARGET_ORIGIN};

const SEARCH_PATH: &str = "/doj-search/api/v1/search";
pub const MAX_PAGE_SIZE: usize = 100;
const MAX_ATTEMPTS: u32 = 3;
/// Query that matches the whole corpus, used by the full-crawl refresh.
const REFRESH_QUERY: &str = "*";

pub fn build_search_url(query: &str, from: usize, size: usize) -> String {
    let size = size.min(MAX_PAGE_SIZE);
    format!(
        "{TARGET_ORIGIN}{SEARCH_PATH}?q={}&from={from}&size={size}",
        urlencoding::encode(query)
    )
}

fn backoff_ms(attempt: u32) -> u64 {
    1500 * u64::from(attempt)
}

/// Drives the attempt loop: up to MAX_ATTEMPTS tries with linear backoff,
/// signalling a re-prewarm from attempt 2 onward on the assumption that the
/// prior failure means a stale or challenged session. The attempt body is
/// injected so the orchestration is testable without a browser.
async fn retry_search<F, Fut>(mut run_attempt: F) -> Result<Value>
where
    F: FnMut(u32, bool) -> Fut,
    Fut: Future<Output = Result<PageFetch>>,
{
    let mut last_error = anyhow!("search not attempted");
    for attempt in 1..=MAX_ATTEMPTS {
        let reprewarm = attempt > 1;
        match run_attempt(attempt, reprewarm).await {
            Ok(PageFetch::Success(data)) => {
                println!("✅ [Search] Attempt {attempt}/{MAX_ATTEMPTS} succeeded");
                return Ok(data);
            }
            Ok(PageFetch::Blocked {
                status,
                reason,
                body_excerpt,
            }) => {
                warn!("search attempt {attempt}/{MAX_ATTEMPTS} blocked: {status} {reason}");
                last_error = anyhow!("target returned {status} {reason}: {body_excerpt}");
            }
            Err(e) => {
                warn!("search attempt {attempt}/{MAX_ATTEMPTS} failed: {e:#}");
                last_error = e;
            }
        }

        if attempt < MAX_ATTEMPTS {
            sleep(Duration::from_millis(backoff_ms(attempt))).await;
        }
    }
    Err(last_error)
}

/// Runs the search as an in-page XHR against the target. Every attempt uses
/// a fresh tab from the shared browser and closes it no matter how the
/// attempt ends.
pub async fn handle_search_query(query: &str, from: usize, size: usize) -> Result<Value> {
    let pool = pool::get_pool().await?;
    let url = build_search_url(query, from, size);

    retry_search(|attempt, reprewarm| {
        let pool = pool.clone();
        let url = url.clone();
        async move {
            let tab = pool.new_stealth_tab()?;
            let outcome = async {
                if reprewarm {
                    println!("🔄 [Search] Attempt {attempt}/{MAX_ATTEMPTS}: re-prewarming session");
                    pool.prewarm_tab(&tab).await?;
                }
                page_fetch::fetch_json_in_page(&tab, &url)
            }
            .await;
            let _ = tab.close(true);
            outcome
        }
    })
    .await
}

/// Result of the full-crawl pagination. On a mid-crawl failure this carries
/// everything collected before the failing batch.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub total: u64,
    pub documents: Vec<Value>,
    pub batches: u32,
    pub error: Option<String>,
    pub first_batch_failed: bool,
}

/// Paginates the search to exhaustion in MAX_PAGE_SIZE batches. The
/// per-batch fetch is injected so the aggregation logic is testable without
/// a browser.
pub async fn paginate_search<F, Fut>(mut fetch_batch: F) -> RefreshOutcome
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    let mut documents: Vec<Value> = Vec::new();
    let mut total: u64 = 0;
    let mut batches: u32 = 0;
    let mut error = None;
    let mut first_batch_failed = false;
    let mut from = 0usize;

    loop {
        match fetch_batch(from).await {
            Ok(payload) => {
                total = payload["hits"]["total"]["value"].as_u64().unwrap_or(total);
                let hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
                if hits.is_empty() {
                    break;
                }
                batches += 1;
                from += hits.len();
                documents.extend(hits);
                if total > 0 && documents.len() as u64 >= total {
                    break;
                }
            }
            Err(e) => {
                if batches == 0 {
                    first_batch_failed = true;
                }
                error = Some(e.to_string());
                break;
            }
        }
    }

    RefreshOutcome {
        total,
        documents,
        batches,
        error,
        first_batch_failed,
    }
}

pub async fn run_refresh() -> RefreshOutcome {
    println!("🌊 [Refresh] Starting full corpus crawl...");
    let outcome =
        paginate_search(|from| handle_search_query(REFRESH_QUERY, from, MAX_PAGE_SIZE)).await;
    println!(
        "🌊 [Refresh] Collected {} documents in {} batches (total reported: {})",
        outcome.documents.len(),
        outcome.batches,
        outcome.total
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(total: u64, hits: Vec<Value>) -> Value {
        json!({ "hits": { "total": { "value": total }, "hits": hits } })
    }

    #[test]
    fn search_url_caps_size_and_encodes_query() {
        let url = build_search_url("flight logs", 0, 500);
        assert!(url.starts_with("https://www.justice.gov/doj-search/api/v1/search?"));
        assert!(url.contains("q=flight%20logs"));
        assert!(url.contains("size=100"));
        assert!(!url.contains("size=500"));
    }

    #[test]
    fn backoff_grows_linearly() {
        assert_eq!(backoff_ms(1), 1500);
        assert_eq!(backoff_ms(2), 3000);
    }

    #[tokio::test]
    async fn first_attempt_success_runs_exactly_one_attempt() {
        let mut attempts: Vec<(u32, bool)> = Vec::new();
        let result = retry_search(|attempt, reprewarm| {
            attempts.push((attempt, reprewarm));
            async {
                Ok(PageFetch::Success(
                    json!({"hits": {"total": {"value": 2}, "hits": [{}, {}]}}),
                ))
            }
        })
        .await
        .unwrap();
        // One attempt means one tab opened and closed, and no re-prewarm.
        assert_eq!(attempts, vec![(1, false)]);
        assert_eq!(result["hits"]["total"]["value"], 2);
    }

    #[tokio::test]
    async fn blocked_then_success_reprewarms_exactly_once() {
        let mut attempts: Vec<(u32, bool)> = Vec::new();
        let result = retry_search(|attempt, reprewarm| {
            attempts.push((attempt, reprewarm));
            async move {
                if attempt == 1 {
                    Ok(PageFetch::Blocked {
                        status: 403,
                        reason: "Forbidden".to_string(),
                        body_excerpt: "Access Denied".to_string(),
                    })
                } else {
                    Ok(PageFetch::Success(json!({"hits": {"hits": [{"id": 1}]}})))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result["hits"]["hits"][0]["id"], 1);
        // Two tabs total, with the re-prewarm signalled only before attempt 2.
        assert_eq!(attempts, vec![(1, false), (2, true)]);
    }

    #[tokio::test]
    async fn exhausted_attempts_surface_the_last_error() {
        let mut attempts = 0u32;
        let err = retry_search(|attempt, _reprewarm| {
            attempts += 1;
            async move {
                let status = if attempt == MAX_ATTEMPTS { 503 } else { 403 };
                Ok(PageFetch::Blocked {
                    status,
                    reason: "blocked".to_string(),
                    body_excerpt: String::new(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(attempts, MAX_ATTEMPTS);
        assert!(err.to_string().contains("503"), "not the last error: {err}");
    }

    #[tokio::test]
    async fn attempt_errors_are_retried_too() {
        let mut attempts = 0u32;
        let result = retry_search(|attempt, _reprewarm| {
            attempts += 1;
            async move {
                if attempt == 1 {
                    Err(anyhow!("evaluation failed"))
                } else {
                    Ok(PageFetch::Success(json!({"hits": {}})))
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn pagination_collects_until_total_reached() {
        let pages = vec![
            batch(3, vec![json!({"id": 1}), json!({"id": 2})]),
            batch(3, vec![json!({"id": 3})]),
        ];
        let mut calls = 0usize;
        let outcome = paginate_search(|from| {
            let page = pages[calls].clone();
            assert_eq!(from, if calls == 0 { 0 } else { 2 });
            calls += 1;
            async move { Ok(page) }
        })
        .await;
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.documents.len(), 3);
        assert_eq!(outcome.batches, 2);
        assert!(outcome.error.is_none());
        assert!(!outcome.first_batch_failed);
    }

    #[tokio::test]
    async fn later_batch_failure_keeps_what_was_collected() {
        let mut calls = 0usize;
        let outcome = paginate_search(|_from| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Ok(batch(200, vec![json!({"id": "doc-1"})]))
                } else {
                    Err(anyhow!("target returned 403 Forbidden"))
                }
            }
        })
        .await;
        assert_eq!(outcome.total, 200);
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.batches, 1);
        assert!(outcome.error.as_deref().unwrap().contains("403"));
        assert!(!outcome.first_batch_failed);
    }

    #[tokio::test]
    async fn first_batch_failure_is_distinguished() {
        let outcome = paginate_search(|_from| async { Err(anyhow!("upstream 502")) }).await;
        assert_eq!(outcome.documents.len(), 0);
        assert_eq!(outcome.batches, 0);
        assert!(outcome.first_batch_failed);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn empty_batch_stops_the_crawl() {
        let mut calls = 0usize;
        let outcome = paginate_search(|_from| {
            calls += 1;
            let call = calls;
            async move {
                if call == 1 {
                    Ok(batch(0, vec![json!({"id": 1})]))
                } else {
                    Ok(batch(0, vec![]))
                }
            }
        })
        .await;
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.batches, 1);
        assert!(outcome.error.is_none());
    }
}
