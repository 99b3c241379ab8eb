//! Carries out one [`Action`] on a [`Page`].

use browser::{BrowserError, Page};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::action::{Action, ActionKind};
use crate::settings::LoopSettings;

const DEFAULT_SCROLL: i64 = 500;
const DEFAULT_WAIT_MS: i64 = 1000;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("unsupported action '{0}'")]
    Unsupported(String),

    #[error("cannot resolve URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Execute `action` and describe what happened. `done` is handled by the
/// loop and never reaches here.
pub async fn execute(
    page: &dyn Page,
    action: &Action,
    base_url: &str,
    settings: &LoopSettings,
) -> Result<String, ActionError> {
    match &action.kind {
        ActionKind::Click => {
            let selector = action
                .arg_text("selector")
                .ok_or(ActionError::MissingArgument("selector"))?;
            click(page, &selector, settings.click_timeout).await
        }
        ActionKind::Type => {
            let selector = action
                .arg_text("selector")
                .ok_or(ActionError::MissingArgument("selector"))?;
            let text = action
                .arg_text("text")
                .ok_or(ActionError::MissingArgument("text"))?;
            page.fill(&selector, &text, settings.fill_timeout).await?;
            Ok(format!("Typed \"{}\" into {}", text, selector))
        }
        ActionKind::Scroll => {
            let amount = action.arg_i64("amount").unwrap_or(DEFAULT_SCROLL).abs();
            let up = action
                .arg_str("direction")
                .is_some_and(|d| d.trim().eq_ignore_ascii_case("up"));
            page.scroll_by(if up { -amount } else { amount }).await?;
            Ok(format!("Scrolled {} {}px", if up { "up" } else { "down" }, amount))
        }
        ActionKind::Navigate => {
            let target = action
                .arg_text("url")
                .ok_or(ActionError::MissingArgument("url"))?;
            let url = resolve_url(base_url, &target)?;
            page.goto(&url, settings.navigate_timeout).await?;
            Ok(format!("Navigated to {}", url))
        }
        ActionKind::Wait => {
            let max = settings.max_wait.as_millis() as i64;
            let ms = action.arg_i64("ms").unwrap_or(DEFAULT_WAIT_MS).clamp(0, max);
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
            Ok(format!("Waited {}ms", ms))
        }
        ActionKind::Done => Ok("Verification finished".to_string()),
        ActionKind::Unsupported(name) => Err(ActionError::Unsupported(name.clone())),
    }
}

/// Selector first; if it does not resolve, retry by visible text
async fn click(page: &dyn Page, selector: &str, timeout: Duration) -> Result<String, ActionError> {
    match page.click(selector, timeout).await {
        Ok(()) => Ok(format!("Clicked {}", selector)),
        Err(e) if e.is_resolution_failure() => {
            let text = fallback_text(selector);
            tracing::debug!("[Dispatch] Selector {} did not resolve ({}); trying text \"{}\"", selector, e, text);
            page.click_text(&text, timeout).await?;
            Ok(format!("Clicked text \"{}\"", text))
        }
        Err(e) => Err(e.into()),
    }
}

/// Visible text implied by a selector: `text=Foo`, `:has-text("Foo")`,
/// `:contains("Foo")`, or the selector itself.
pub fn fallback_text(selector: &str) -> String {
    let selector = selector.trim();
    if let Some(rest) = selector.strip_prefix("text=") {
        return unquote(rest).to_string();
    }
    for marker in [":has-text(", ":contains(", ":text("] {
        if let Some(start) = selector.find(marker) {
            let inner = &selector[start + marker.len()..];
            if let Some(end) = inner.rfind(')') {
                return unquote(&inner[..end]).to_string();
            }
        }
    }
    unquote(selector).to_string()
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

/// Absolute URLs pass through; anything else resolves against `base_url`
pub fn resolve_url(base_url: &str, target: &str) -> Result<String, ActionError> {
    let invalid = |reason: String| ActionError::InvalidUrl {
        url: target.to_string(),
        reason,
    };
    match Url::parse(target) {
        Ok(url) => Ok(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(base_url).map_err(|e| invalid(format!("base URL {}: {}", base_url, e)))?;
            base.join(target)
                .map(|url| url.to_string())
                .map_err(|e| invalid(e.to_string()))
        }
        Err(e) => Err(invalid(e.to_string())),
    }
}
