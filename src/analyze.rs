use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use headless_chrome::Tab;
use lopdf::Object;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::page_fetch::{self, PageFetch};
use crate::pool;
use crate::ssrf::SafeUrl;

/// URL fragments that mark the target's interstitial age-verification page.
const AGE_GATE_MARKERS: &[&str] = &["age-verification", "agecheck", "age_gate", "confirm-age"];

/// Finds and clicks a confirmation control with flexible "I am 18" wording.
/// Returns "clicked" or "not-found"; on not-found we proceed anyway, since
/// the session's cookies may already satisfy the gate.
const AGE_GATE_CLICK_SCRIPT: &str = r#"
(() => {
    const pattern = /i\s*(?:am|'m)\s*(?:over\s*)?18|over\s*18|18\s*(?:\+|or\s*older|years)/i;
    const candidates = document.querySelectorAll('button, a, input[type="submit"], [role="button"]');
    for (const el of candidates) {
        const label = (el.textContent || el.value || '').trim();
        if (pattern.test(label)) {
            el.click();
            return 'clicked';
        }
    }
    return 'not-found';
})();
"#;

#[derive(Debug, Serialize)]
pub struct AnalyzeMetadata {
    #[serde(rename = "fileSize")]
    pub file_size: u64,
    #[serde(rename = "extractedAt")]
    pub extracted_at: String,
    pub info: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResult {
    pub text: String,
    pub pages: usize,
    pub metadata: AnalyzeMetadata,
}

/// Navigates to a validated document URL, passes the age gate if one
/// appears, downloads the PDF from inside the browser context so the
/// challenge-bearing session rides along, and extracts its text.
pub async fn handle_analyze(safe_url: &SafeUrl) -> Result<AnalyzeResult> {
    let pool = pool::get_pool().await?;
    let tab = pool.new_stealth_tab()?;
    let outcome = analyze_on_tab(&tab, safe_url).await;
    let _ = tab.close(true);
    outcome
}

async fn analyze_on_tab(tab: &Tab, safe_url: &SafeUrl) -> Result<AnalyzeResult> {
    println!("📄 [Analyze] Navigating to {safe_url}");
    tab.navigate_to(safe_url.as_str())?;
    tab.wait_until_navigated()?;

    if looks_like_age_gate(&tab.get_url()) {
        pass_age_gate(tab).await;
    }

    println!("📄 [Analyze] Fetching document binary in-page...");
    let payload = match page_fetch::fetch_binary_in_page(tab, safe_url.as_str())? {
        PageFetch::Success(data) => data,
        PageFetch::Blocked { status, reason, .. } => {
            bail!("document fetch returned {status} {reason}")
        }
    };
    let encoded = payload
        .as_str()
        .ok_or_else(|| anyhow!("in-page fetch returned no base64 payload"))?;
    let bytes = BASE64
        .decode(encoded)
        .context("failed to decode base64 document payload")?;
    println!("📄 [Analyze] Downloaded {} bytes", bytes.len());

    let (text, pages, info) = extract_pdf(&bytes)?;
    Ok(AnalyzeResult {
        text,
        pages,
        metadata: AnalyzeMetadata {
            file_size: bytes.len() as u64,
            extracted_at: chrono::Utc::now().to_rfc3339(),
            info,
        },
    })
}

async fn pass_age_gate(tab: &Tab) {
    println!("🔞 [Analyze] Age gate detected, attempting confirmation click");
    match tab.evaluate(AGE_GATE_CLICK_SCRIPT, false) {
        Ok(result) => {
            if result.value == Some(Value::String("clicked".to_string())) {
                sleep(Duration::from_secs(1)).await;
                let _ = tab.wait_until_navigated();
            } else {
                println!("🔞 [Analyze] No confirmation control found, proceeding anyway");
            }
        }
        Err(e) => {
            warn!("age gate click failed, proceeding anyway: {e:#}");
        }
    }
}

fn looks_like_age_gate(url: &str) -> bool {
    let url = url.to_lowercase();
    AGE_GATE_MARKERS.iter().any(|m| url.contains(m))
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, usize, Option<Value>)> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| anyhow!("PDF text extraction failed: {e}"))?;
    let doc = lopdf::Document::load_mem(bytes).context("failed to parse PDF structure")?;
    let pages = doc.get_pages().len();
    let info = info_dict_to_json(&doc);
    Ok((text, pages, info))
}

/// Flattens the PDF trailer's Info dictionary into JSON, skipping entries
/// with non-scalar values.
fn info_dict_to_json(doc: &lopdf::Document) -> Option<Value> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };

    let mut map = serde_json::Map::new();
    for (key, value) in dict.iter() {
        let key = String::from_utf8_lossy(key).to_string();
        let value = match value {
            Object::String(bytes, _) => Value::String(String::from_utf8_lossy(bytes).to_string()),
            Object::Name(name) => Value::String(String::from_utf8_lossy(name).to_string()),
            Object::Integer(n) => Value::from(*n),
            Object::Real(n) => Value::from(f64::from(*n)),
            Object::Boolean(b) => Value::from(*b),
            _ => continue,
        };
        map.insert(key, value);
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}
