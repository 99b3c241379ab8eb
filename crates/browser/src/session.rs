//! Browser Session - one launched browser driving one page
//!
//! Owns the browser process, the CDP connection, the attached page target
//! and the watchdogs. Implements [`Page`] on top of raw CDP commands.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::cdp::protocol::CreateTargetResult;
use crate::cdp::session::PAGE_DOMAINS;
use crate::cdp::{CDPClient, CDPError, CDPSession};
use crate::error::{BrowserError, Result};
use crate::events::BrowserEvent;
use crate::page::{BrowserKind, LaunchOptions, Page};
use crate::scripts;
use crate::watchdog::WatchdogManager;
use crate::watchdogs::{CrashWatchdog, DialogWatchdog, NetworkWatchdog};

const LOCATE_POLL: Duration = Duration::from_millis(100);
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Element center in viewport coordinates
#[derive(Debug, Clone, Copy, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

pub struct BrowserSession {
    kind: BrowserKind,
    client: Arc<CDPClient>,
    page: CDPSession,

    watchdog_manager: WatchdogManager,
    crash: Arc<CrashWatchdog>,
    network: Arc<NetworkWatchdog>,

    process: Mutex<Option<Child>>,
    profile_dir: Option<PathBuf>,
    closed: AtomicBool,
}

impl BrowserSession {
    /// Connect to a freshly launched browser and open the page target.
    ///
    /// `process` and `profile_dir` become owned by the session and are
    /// released by [`Page::close`].
    pub async fn connect(
        kind: BrowserKind,
        process: Child,
        ws_url: &str,
        profile_dir: PathBuf,
        options: &LaunchOptions,
        command_timeout: Duration,
    ) -> Result<Self> {
        let client = CDPClient::connect_with_timeout(ws_url, command_timeout).await?;

        let crash = Arc::new(CrashWatchdog::new());
        let network = Arc::new(NetworkWatchdog::new());
        let mut watchdog_manager = WatchdogManager::new();
        watchdog_manager.register(crash.clone());
        watchdog_manager.register(network.clone());
        watchdog_manager.register(Arc::new(DialogWatchdog::new()));

        // Subscribe before the target exists so no early event is missed
        watchdog_manager.attach_all(client.clone()).await?;

        let created = client
            .send_request(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        let created: CreateTargetResult = serde_json::from_value(created).map_err(CDPError::Json)?;

        let page = CDPSession::attach(client.clone(), created.target_id, PAGE_DOMAINS).await?;
        page.set_viewport(options.width, options.height).await?;

        let session = Self {
            kind,
            client,
            page,
            watchdog_manager,
            crash,
            network,
            process: Mutex::new(Some(process)),
            profile_dir: Some(profile_dir),
            closed: AtomicBool::new(false),
        };

        session
            .dispatch(BrowserEvent::Launched {
                engine: kind.to_string(),
            })
            .await;

        Ok(session)
    }

    async fn dispatch(&self, event: BrowserEvent) {
        self.watchdog_manager.dispatch(&event).await;
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.client.is_closed() {
            return Err(BrowserError::Closed);
        }
        self.crash.check()
    }

    /// Evaluate an expression and return its value
    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.ensure_usable()?;
        let result = self.page.evaluate(expression).await?;
        if let Some(details) = result.exception_details {
            return Err(BrowserError::Script(details.message()));
        }
        Ok(result.result.value.unwrap_or(Value::Null))
    }

    /// Poll a locator script until it yields a point or the timeout passes
    async fn locate(&self, script: &str, what: &str, timeout: Duration) -> Result<Point> {
        let deadline = Instant::now() + timeout;
        loop {
            let value = self.evaluate(script).await?;
            match value {
                Value::Object(_) => {
                    return serde_json::from_value(value)
                        .map_err(|e| BrowserError::Script(format!("bad element position: {}", e)));
                }
                Value::String(ref s) if s == "invalid" => {
                    return Err(BrowserError::ElementNotFound(format!(
                        "{} (invalid selector)",
                        what
                    )));
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(what.to_string()));
            }
            tokio::time::sleep(LOCATE_POLL).await;
        }
    }

    async fn navigate_and_wait(&self, url: &str) -> Result<()> {
        let loaded = self.client.expect_event("Page.domContentEventFired");
        let nav = self.page.navigate(url).await?;

        if let Some(reason) = nav.error_text.filter(|t| !t.is_empty()) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason,
            });
        }

        // Same-document navigations never fire a new load event
        if nav.loader_id.is_some() {
            loaded.await.map_err(|_| BrowserError::Closed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Page for BrowserSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.ensure_usable()?;
        self.dispatch(BrowserEvent::NavigationStarted {
            url: url.to_string(),
        })
        .await;

        tokio::time::timeout(timeout, self.navigate_and_wait(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("after {:?} loading {}", timeout, url)))??;

        self.dispatch(BrowserEvent::NavigationComplete {
            url: url.to_string(),
        })
        .await;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        self.ensure_usable()?;
        self.network.wait_for_idle(NETWORK_QUIET, timeout).await
    }

    async fn url(&self) -> Result<String> {
        let value = self.evaluate(scripts::LOCATION_HREF).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String> {
        let value = self.evaluate(scripts::DOCUMENT_TITLE).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        let data = self.page.capture_screenshot().await?;
        Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        let point = self
            .locate(&scripts::locate_selector(selector), selector, timeout)
            .await?;
        self.page.click_at(point.x, point.y).await?;
        Ok(())
    }

    async fn click_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let what = format!("text \"{}\"", text);
        let point = self
            .locate(&scripts::locate_text(text), &what, timeout)
            .await?;
        self.page.click_at(point.x, point.y).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<()> {
        self.locate(&scripts::focus_and_clear(selector), selector, timeout)
            .await?;
        self.page.insert_text(text).await?;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> Result<()> {
        self.evaluate(&scripts::scroll_by(delta_y)).await?;
        Ok(())
    }

    async fn scroll_to_ratio(&self, ratio: f64) -> Result<()> {
        self.evaluate(&scripts::scroll_to_ratio(ratio)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Closing {} session", self.kind);

        self.dispatch(BrowserEvent::Closed).await;
        if let Err(e) = self.watchdog_manager.detach_all().await {
            tracing::debug!("Watchdog detach failed: {}", e);
        }

        if let Err(e) = self.client.send_request("Browser.close", None, None).await {
            tracing::debug!("Browser.close failed: {}", e);
        }
        if let Err(e) = self.client.close().await {
            tracing::debug!("CDP close failed: {}", e);
        }

        let mut result = Ok(());
        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(PROCESS_EXIT_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("{} did not exit after Browser.close; killing", self.kind);
                    if let Err(e) = child.kill().await {
                        result = Err(BrowserError::Io(e));
                    }
                }
            }
        }

        if let Some(dir) = &self.profile_dir {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                tracing::debug!("Could not remove profile {}: {}", dir.display(), e);
            }
        }

        result
    }
}
