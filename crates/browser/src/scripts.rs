//! JavaScript snippets evaluated in the page.
//!
//! User input is embedded as JSON string literals, which are valid JS.
//! Element lookups return `{x, y}` (viewport center of the element, after
//! scrolling it into view), `null` when nothing matches yet, or the string
//! `"invalid"` when the selector itself does not parse.

fn literal(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

const CENTER_OF_EL: &str = r#"
  el.scrollIntoView({ block: 'center', inline: 'center' });
  const r = el.getBoundingClientRect();
  if (r.width === 0 && r.height === 0) return null;
  return { x: r.left + r.width / 2, y: r.top + r.height / 2 };"#;

/// Locate by CSS selector
pub fn locate_selector(selector: &str) -> String {
    format!(
        r#"(() => {{
  let el;
  try {{ el = document.querySelector({sel}); }} catch (e) {{ return 'invalid'; }}
  if (!el) return null;{center}
}})()"#,
        sel = literal(selector),
        center = CENTER_OF_EL,
    )
}

/// Locate by visible text: exact match on clickable elements first, then
/// substring on clickable elements, then the smallest element containing it.
pub fn locate_text(text: &str) -> String {
    format!(
        r#"(() => {{
  const needle = {text}.trim().toLowerCase();
  if (!needle) return null;
  const visible = (n) => {{ const b = n.getBoundingClientRect(); return b.width > 0 && b.height > 0; }};
  const label = (n) => (n.innerText || n.value || n.getAttribute('aria-label') || '').trim().toLowerCase();
  const clickable = Array.from(document.querySelectorAll(
    'a, button, input[type=submit], input[type=button], [role=button], [role=link], [role=tab], [role=menuitem], label, summary, [onclick]'
  )).filter(visible);
  let el = clickable.find((n) => label(n) === needle) || clickable.find((n) => label(n).includes(needle));
  if (!el && document.body) {{
    const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT);
    while (walker.nextNode()) {{
      const n = walker.currentNode;
      if (visible(n) && label(n).includes(needle) && (!el || label(n).length <= label(el).length)) el = n;
    }}
  }}
  if (!el) return null;{center}
}})()"#,
        text = literal(text),
        center = CENTER_OF_EL,
    )
}

/// Locate by selector, focus the element and clear its current value
pub fn focus_and_clear(selector: &str) -> String {
    format!(
        r#"(() => {{
  let el;
  try {{ el = document.querySelector({sel}); }} catch (e) {{ return 'invalid'; }}
  if (!el) return null;
  el.scrollIntoView({{ block: 'center', inline: 'center' }});
  el.focus();
  if ('value' in el) {{
    el.value = '';
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  }} else if (el.isContentEditable) {{
    el.textContent = '';
  }}
  const r = el.getBoundingClientRect();
  return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }};
}})()"#,
        sel = literal(selector),
    )
}

/// Scroll to a fraction of the scrollable height
pub fn scroll_to_ratio(ratio: f64) -> String {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
    format!(
        "(() => {{ const max = document.documentElement.scrollHeight - window.innerHeight; \
         window.scrollTo({{ top: Math.max(0, max * {}), behavior: 'instant' }}); return window.scrollY; }})()",
        ratio
    )
}

/// Relative vertical scroll
pub fn scroll_by(delta_y: i64) -> String {
    format!(
        "(() => {{ window.scrollBy({{ top: {}, behavior: 'instant' }}); return window.scrollY; }})()",
        delta_y
    )
}

pub const LOCATION_HREF: &str = "location.href";
pub const DOCUMENT_TITLE: &str = "document.title";
