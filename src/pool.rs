//! Process-wide browser pool: one stealth Chrome shared by all requests.
//!
//! All tabs spawned from the pooled browser share its default browsing
//! context, so the Akamai challenge cookies acquired during prewarm are live
//! in every work request. A broken pool is never repaired in place: teardown
//! and full rebuild only.

use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use rand::Rng;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;

use crate::config::CONFIG;
use crate::fingerprint::{generate_fingerprint, StealthFingerprint};
use crate::stealth::{self, ProxyConfig};

pub const TARGET_ORIGIN: &str = "https://www.justice.gov";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

static POOL: Lazy<Mutex<Option<Arc<BrowserPool>>>> = Lazy::new(|| Mutex::new(None));
static PREWARM_TASK: Lazy<StdMutex<Option<JoinHandle<()>>>> = Lazy::new(|| StdMutex::new(None));

/// Small human-ish wiggle after the prewarm navigation. Dispatched as DOM
/// events rather than CDP input so it stays cheap.
const MOUSE_JIGGLE_SCRIPT: &str = r#"
(async () => {
    const steps = 20;
    for (let i = 0; i <= steps; i++) {
        const t = i / steps;
        document.dispatchEvent(new MouseEvent('mousemove', {
            view: window,
            bubbles: true,
            cancelable: true,
            clientX: 100 + 400 * t + (Math.random() - 0.5) * 5,
            clientY: 100 + 300 * t + (Math.random() - 0.5) * 5,
        }));
        await new Promise(r => setTimeout(r, 10 + Math.random() * 20));
    }
})();
"#;

/// Awaited after the load event when no proxy is configured: resolves once
/// DOM mutations go quiet for a second, approximating network idle. Under a
/// proxy the load-event wait alone is used to save bandwidth.
const SETTLE_SCRIPT: &str = r#"
new Promise((resolve) => {
    let timeout;
    const observer = new MutationObserver(() => {
        clearTimeout(timeout);
        timeout = setTimeout(() => {
            observer.disconnect();
            resolve('settled');
        }, 1000);
    });
    observer.observe(document.body, { childList: true, subtree: true });
    setTimeout(() => {
        observer.disconnect();
        resolve('timeout');
    }, 8000);
});
"#;

const SCROLL_SCRIPT: &str = r#"
(() => {
    let scrolled = 0;
    const interval = setInterval(() => {
        window.scrollBy(0, 50 + Math.random() * 50);
        scrolled += 100;
        if (scrolled > 400) {
            clearInterval(interval);
            window.scrollBy(0, -150);
        }
    }, 100 + Math.random() * 100);
})();
"#;

pub struct BrowserPool {
    browser: Browser,
    fingerprint: StealthFingerprint,
    proxy: Option<ProxyConfig>,
    last_prewarm: StdMutex<Instant>,
}

impl BrowserPool {
    /// Liveness probe: a CDP version round-trip fails once the Chrome
    /// process is gone.
    pub fn is_connected(&self) -> bool {
        self.browser.get_version().is_ok()
    }

    /// Fresh tab from the shared context, fully stealth-prepared.
    pub fn new_stealth_tab(&self) -> Result<Arc<Tab>> {
        let tab = self.browser.new_tab()?;
        stealth::prepare_tab(&tab, &self.fingerprint, self.proxy.as_ref())?;
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        Ok(tab)
    }

    /// Visit the target homepage so the edge layer plants its challenge
    /// cookies, then linger like a human would.
    pub async fn prewarm_tab(&self, tab: &Tab) -> Result<()> {
        println!("🔥 [Pool] Prewarming session against {TARGET_ORIGIN}...");
        tab.navigate_to(TARGET_ORIGIN)?;
        tab.wait_until_navigated()?;
        if self.proxy.is_none() {
            let _ = tab.evaluate(SETTLE_SCRIPT, true);
        }
        sleep(Duration::from_millis(build_akamai_delay_ms())).await;
        let _ = tab.evaluate(MOUSE_JIGGLE_SCRIPT, false);
        let _ = tab.evaluate(SCROLL_SCRIPT, false);
        Ok(())
    }

    pub fn seconds_since_prewarm(&self) -> u64 {
        let guard = match self.last_prewarm.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        guard.elapsed().as_secs()
    }

    fn touch_prewarm(&self) {
        let mut guard = match self.last_prewarm.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        *guard = Instant::now();
    }
}

/// Randomized post-navigation settle delay, always in [2000, 4000) ms.
pub fn build_akamai_delay_ms() -> u64 {
    rand::thread_rng().gen_range(2000..4000)
}

/// Returns the live pool, rebuilding it wholesale if none exists or the
/// browser process has disconnected.
pub async fn get_pool() -> Result<Arc<BrowserPool>> {
    let mut slot = POOL.lock().await;
    if let Some(pool) = slot.as_ref() {
        if pool.is_connected() {
            return Ok(pool.clone());
        }
        println!("⚠️ [Pool] Browser disconnected, rebuilding from scratch");
    }
    init_locked(&mut slot).await
}

/// Tears down any existing pool and builds a new one: new browser, new
/// fingerprint, fresh prewarm.
pub async fn init_browser_pool() -> Result<Arc<BrowserPool>> {
    let mut slot = POOL.lock().await;
    init_locked(&mut slot).await
}

async fn init_locked(slot: &mut Option<Arc<BrowserPool>>) -> Result<Arc<BrowserPool>> {
    cancel_prewarm_task();
    if slot.take().is_some() {
        println!("♻️ [Pool] Tearing down previous browser pool");
    }

    let fingerprint = generate_fingerprint();
    let proxy = match CONFIG.proxy_url.as_deref() {
        Some(raw) => Some(stealth::parse_proxy_url(raw)?),
        None => None,
    };

    println!("🚀 [Pool] Launching stealth browser (UA: {})", fingerprint.user_agent);
    let browser = launch_browser(&fingerprint, proxy.as_ref())?;
    let pool = Arc::new(BrowserPool {
        browser,
        fingerprint,
        proxy,
        last_prewarm: StdMutex::new(Instant::now()),
    });

    // Scratch tab exists only to run the prewarm navigation.
    let tab = pool.new_stealth_tab()?;
    let warmed = pool.prewarm_tab(&tab).await;
    let _ = tab.close(true);
    warmed?;
    pool.touch_prewarm();

    *slot = Some(pool.clone());
    if CONFIG.prewarm_interval_secs > 0 {
        spawn_prewarm_task(CONFIG.prewarm_interval_secs);
    }
    println!("✅ [Pool] Browser pool ready");
    Ok(pool)
}

/// Best-effort teardown. Cancels the periodic prewarm task before touching
/// browser resources, then drops the pool; never fails.
pub async fn destroy_browser_pool() {
    cancel_prewarm_task();
    let dropped = POOL.lock().await.take();
    if dropped.is_some() {
        println!("🛑 [Pool] Browser pool destroyed");
    }
}

fn launch_browser(
    fingerprint: &StealthFingerprint,
    proxy: Option<&ProxyConfig>,
) -> Result<Browser> {
    let arg_strings = stealth::chrome_args(fingerprint, proxy);
    let args: Vec<&OsStr> = arg_strings.iter().map(OsStr::new).collect();
    Browser::new(LaunchOptions {
        headless: true,
        window_size: Some(fingerprint.viewport),
        args,
        // The pool is long-lived; the crate default would reap Chrome after
        // 30 idle seconds.
        idle_browser_timeout: Duration::from_secs(86_400),
        ..Default::default()
    })
    .context("failed to launch stealth browser")
}

fn spawn_prewarm_task(interval_secs: u64) {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // First tick fires immediately and the pool was just warmed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_prewarm().await {
                warn!("periodic prewarm failed: {e:#}");
            }
        }
    });
    let mut guard = match PREWARM_TASK.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    if let Some(old) = guard.replace(handle) {
        old.abort();
    }
}

async fn refresh_prewarm() -> Result<()> {
    let pool = { POOL.lock().await.clone() };
    let Some(pool) = pool else { return Ok(()) };
    if !pool.is_connected() {
        // Next get_pool() rebuilds; nothing to warm here.
        return Ok(());
    }
    println!(
        "🔥 [Pool] Periodic re-prewarm ({}s since last)",
        pool.seconds_since_prewarm()
    );
    let tab = pool.new_stealth_tab()?;
    let warmed = pool.prewarm_tab(&tab).await;
    let _ = tab.close(true);
    warmed?;
    pool.touch_prewarm();
    Ok(())
}

fn cancel_prewarm_task() {
    let mut guard = match PREWARM_TASK.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    };
    if let Some(handle) = guard.take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn akamai_delay_stays_in_band() {
        for _ in 0..50 {
            let delay = build_akamai_delay_ms();
            assert!((2000..4000).contains(&delay), "delay out of band: {delay}");
        }
    }

    #[test]
    fn prewarm_scripts_simulate_mouse_and_scroll() {
        assert!(MOUSE_JIGGLE_SCRIPT.contains("mousemove"));
        assert!(SCROLL_SCRIPT.contains("scrollBy"));
    }

    #[test]
    fn settle_script_waits_for_dom_quiet_with_a_bound() {
        assert!(SETTLE_SCRIPT.contains("MutationObserver"));
        assert!(SETTLE_SCRIPT.contains("8000"));
    }
}
