use once_cell::sync::Lazy;
use std::env;

/// Environment-derived worker configuration, loaded once at first use.
pub struct WorkerConfig {
    /// Shared secret for request signatures. Empty means misconfigured:
    /// every signed route answers 500 until it is set.
    pub shared_secret: String,
    pub allowed_origins: Vec<String>,
    pub proxy_url: Option<String>,
    /// Seconds between background prewarm refreshes. 0 disables the timer.
    pub prewarm_interval_secs: u64,
    pub port: u16,
}

pub static CONFIG: Lazy<WorkerConfig> = Lazy::new(WorkerConfig::from_env);

impl WorkerConfig {
    fn from_env() -> Self {
        let proxy_url = env::var("PROXY_URL").ok().filter(|s| !s.trim().is_empty());

        // Periodic prewarm burns proxy bandwidth, so it defaults off when a
        // proxy is configured. Retries re-prewarm on demand instead.
        let default_interval = if proxy_url.is_some() { 0 } else { 600 };
        let prewarm_interval_secs = env::var("PREWARM_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_interval);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        WorkerConfig {
            shared_secret: env::var("WORKER_SHARED_SECRET").unwrap_or_default(),
            allowed_origins,
            proxy_url,
            prewarm_interval_secs,
            port,
        }
    }
}
