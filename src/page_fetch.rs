//! In-page network calls, marshalled back to the host as JSON strings.
//!
//! Requests against the target must run inside the page's own JavaScript
//! context: the Akamai challenge tokens are JS-derived, so copying cookies
//! into an external HTTP client is not enough (an earlier cookie-extraction
//! variant of this worker regressed exactly that way). Every script below
//! returns a JSON envelope with an explicit `error` discriminant.

use anyhow::{bail, Result};
use headless_chrome::Tab;
use serde::Deserialize;
use serde_json::Value;

const BODY_EXCERPT_BYTES: usize = 500;

/// Outcome of an in-page fetch against the target site.
#[derive(Debug, Clone)]
pub enum PageFetch {
    Success(Value),
    /// Non-success HTTP status, with a truncated body excerpt so block pages
    /// can't balloon error messages.
    Blocked {
        status: u16,
        reason: String,
        body_excerpt: String,
    },
}

#[derive(Deserialize)]
struct FetchEnvelope {
    error: bool,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    data: Option<Value>,
}

pub fn parse_fetch_envelope(raw: &str) -> Result<PageFetch> {
    let envelope: FetchEnvelope = serde_json::from_str(raw)?;
    if envelope.error {
        Ok(PageFetch::Blocked {
            status: envelope.status,
            reason: envelope.reason,
            body_excerpt: envelope.body,
        })
    } else {
        Ok(PageFetch::Success(envelope.data.unwrap_or(Value::Null)))
    }
}

fn js_string_literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// JSON GET executed with the page's live cookies and challenge state.
pub fn fetch_json_in_page(tab: &Tab, url: &str) -> Result<PageFetch> {
    let script = format!(
        r#"
(async () => {{
    try {{
        const resp = await fetch({url}, {{
            headers: {{ 'accept': 'application/json' }},
            credentials: 'include',
        }});
        if (!resp.ok) {{
            let body = '';
            try {{ body = (await resp.text()).slice(0, {excerpt}); }} catch (e) {{}}
            return JSON.stringify({{ error: true, status: resp.status, reason: resp.statusText, body }});
        }}
        const data = await resp.json();
        return JSON.stringify({{ error: false, data }});
    }} catch (e) {{
        return JSON.stringify({{ error: true, status: 0, reason: String(e), body: '' }});
    }}
}})()
"#,
        url = js_string_literal(url),
        excerpt = BODY_EXCERPT_BYTES,
    );
    evaluate_to_envelope(tab, &script)
}

/// Binary GET executed in-page. The payload is base64-encoded inside the
/// page because an evaluation can only marshal strings and JSON back out.
pub fn fetch_binary_in_page(tab: &Tab, url: &str) -> Result<PageFetch> {
    let script = format!(
        r#"
(async () => {{
    try {{
        const resp = await fetch({url}, {{ credentials: 'include' }});
        if (!resp.ok) {{
            return JSON.stringify({{ error: true, status: resp.status, reason: resp.statusText, body: '' }});
        }}
        const buf = await resp.arrayBuffer();
        const bytes = new Uint8Array(buf);
        let binary = '';
        const chunk = 0x8000;
        for (let i = 0; i < bytes.length; i += chunk) {{
            binary += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
        }}
        return JSON.stringify({{ error: false, data: btoa(binary) }});
    }} catch (e) {{
        return JSON.stringify({{ error: true, status: 0, reason: String(e), body: '' }});
    }}
}})()
"#,
        url = js_string_literal(url),
    );
    evaluate_to_envelope(tab, &script)
}

fn evaluate_to_envelope(tab: &Tab, script: &str) -> Result<PageFetch> {
    let result = tab.evaluate(script, true)?;
    match result.value {
        Some(Value::String(raw)) => parse_fetch_envelope(&raw),
        other => bail!("unexpected in-page fetch result: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_carries_payload() {
        let raw = r#"{"error":false,"data":{"hits":{"total":{"value":2},"hits":[{},{}]}}}"#;
        match parse_fetch_envelope(raw).unwrap() {
            PageFetch::Success(data) => {
                assert_eq!(data["hits"]["total"]["value"], 2);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn blocked_envelope_carries_status_reason_excerpt() {
        let raw = r#"{"error":true,"status":403,"reason":"Forbidden","body":"Access Denied"}"#;
        match parse_fetch_envelope(raw).unwrap() {
            PageFetch::Blocked {
                status,
                reason,
                body_excerpt,
            } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "Forbidden");
                assert_eq!(body_excerpt, "Access Denied");
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn envelope_without_discriminant_is_an_error() {
        assert!(parse_fetch_envelope(r#"{"hits":[]}"#).is_err());
        assert!(parse_fetch_envelope("not json").is_err());
    }

    #[test]
    fn urls_are_embedded_as_escaped_js_literals() {
        let lit = js_string_literal("https://x/\"quote\"?a=1");
        assert_eq!(lit, "\"https://x/\\\"quote\\\"?a=1\"");
    }
}
