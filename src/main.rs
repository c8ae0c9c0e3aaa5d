mod analyze;
mod api;
mod auth;
mod config;
mod fingerprint;
mod page_fetch;
mod pool;
mod rate_limit;
mod search;
mod ssrf;
mod stealth;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use dotenv::dotenv;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::config::CONFIG;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    if CONFIG.shared_secret.is_empty() {
        warn!("WORKER_SHARED_SECRET is not set; signed routes will answer 500");
    }
    if CONFIG.proxy_url.is_some() {
        println!("🔌 Outbound proxy configured");
    }

    let protected = Router::new()
        .route("/search", post(api::search))
        .route("/analyze", post(api::analyze))
        .route("/refresh", post(api::refresh))
        .route_layer(middleware::from_fn(auth::require_signature));

    let app = Router::new()
        .route("/health", get(api::health))
        .merge(protected)
        .layer(build_cors());

    let addr = format!("0.0.0.0:{}", CONFIG.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!("🕵️ Stealth worker listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The browser process outlives the HTTP surface unless we tear it down.
    pool::destroy_browser_pool().await;
    Ok(())
}

fn build_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = CONFIG
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(auth::SIGNATURE_HEADER),
        ])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    println!("🛑 Shutdown signal received");
}
