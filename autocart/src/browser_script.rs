//! JavaScript snippets evaluated in the live tab through the extension bridge.
//!
//! Elements are addressed by a `data-autocart-ref` attribute that the query
//! snippet stamps on every match. Each snippet evaluates to exactly one of
//! `{ok: value}`, `{stale: ref}`, `{invalidSelector: message}` or
//! `{error: message}`.

use crate::AutomationError;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

pub const REF_ATTRIBUTE: &str = "data-autocart-ref";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ScriptOutcome {
    Ok(Value),
    Stale(String),
    InvalidSelector(String),
    Error(String),
}

/// A node reference as returned by [`query_all`] and [`parent`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub tag: String,
}

fn js_string(s: &str) -> String {
    // serde_json string literals are valid JS string literals
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn wrap(body: &str) -> String {
    format!(
        r#"(() => {{
  const byRef = (r) => document.querySelector('[{attr}="' + r + '"]');
  const tagRef = (el) => {{
    if (!el.getAttribute('{attr}')) {{
      window.__autocartSeq = (window.__autocartSeq || 0) + 1;
      el.setAttribute('{attr}', String(window.__autocartSeq));
    }}
    return {{ ref: el.getAttribute('{attr}'), tag: el.tagName.toLowerCase() }};
  }};
  try {{
{body}
  }} catch (e) {{
    return {{ error: String((e && e.message) || e) }};
  }}
}})()"#,
        attr = REF_ATTRIBUTE,
        body = body
    )
}

fn with_element(reference: &str, body: &str) -> String {
    wrap(&format!(
        "    const r = {r};\n    const el = byRef(r);\n    if (!el) return {{ stale: r }};\n{body}",
        r = js_string(reference),
        body = body
    ))
}

pub fn query_all(selector: &str) -> String {
    wrap(&format!(
        r#"    let found;
    try {{
      found = Array.from(document.querySelectorAll({sel}));
    }} catch (e) {{
      return {{ invalidSelector: String((e && e.message) || e) }};
    }}
    return {{ ok: found.map(tagRef) }};"#,
        sel = js_string(selector)
    ))
}

pub fn text(reference: &str) -> String {
    with_element(reference, "    return { ok: el.innerText ?? el.textContent ?? '' };")
}

pub fn bounds(reference: &str) -> String {
    with_element(
        reference,
        r#"    const b = el.getBoundingClientRect();
    return { ok: { x: b.x, y: b.y, width: b.width, height: b.height } };"#,
    )
}

pub fn is_displayed(reference: &str) -> String {
    with_element(
        reference,
        r#"    const s = window.getComputedStyle(el);
    return { ok: el.isConnected && s.display !== 'none' && s.visibility !== 'hidden' };"#,
    )
}

pub fn click(reference: &str) -> String {
    with_element(
        reference,
        r#"    el.scrollIntoView({ block: 'center' });
    el.click();
    return { ok: true };"#,
    )
}

pub fn parent(reference: &str) -> String {
    with_element(
        reference,
        "    return { ok: el.parentElement ? tagRef(el.parentElement) : null };",
    )
}

pub fn press_key(key: &str) -> String {
    wrap(&format!(
        r#"    const target = document.activeElement || document.body;
    for (const type of ['keydown', 'keyup']) {{
      target.dispatchEvent(new KeyboardEvent(type, {{ key: {key}, bubbles: true }}));
    }}
    return {{ ok: true }};"#,
        key = js_string(key)
    ))
}

pub fn scroll_by(dx: f64, dy: f64) -> String {
    wrap(&format!(
        "    window.scrollBy({dx}, {dy});\n    return {{ ok: window.scrollY }};"
    ))
}

/// Turn a snippet's result into the payload or a typed error
pub fn decode(raw: Value) -> Result<Value, AutomationError> {
    let outcome: ScriptOutcome = serde_json::from_value(raw.clone()).map_err(|_| {
        let head: String = raw.to_string().chars().take(200).collect();
        AutomationError::PlatformError(format!("unexpected script result: {head}"))
    })?;
    match outcome {
        ScriptOutcome::Ok(value) => Ok(value),
        ScriptOutcome::Stale(r) => {
            debug!(reference = %r, "element reference no longer resolves");
            Err(AutomationError::StaleElement(format!("{REF_ATTRIBUTE}={r}")))
        }
        ScriptOutcome::InvalidSelector(msg) => Err(AutomationError::InvalidSelector(msg)),
        ScriptOutcome::Error(msg) => Err(AutomationError::PlatformError(format!(
            "JavaScript execution failed: {msg}"
        ))),
    }
}

/// Decode into a concrete payload type
pub fn decode_as<T: serde::de::DeserializeOwned>(raw: Value) -> Result<T, AutomationError> {
    Ok(serde_json::from_value(decode(raw)?)?)
}
