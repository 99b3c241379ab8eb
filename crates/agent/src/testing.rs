//! In-memory stand-ins for the browser and model capabilities.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for
//! downstream crates that want to run units without a browser.

use async_trait::async_trait;
use browser::{BrowserError, BrowserLauncher, LaunchOptions, Page};
use protocol::{RunConfig, ScenarioSpec};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::llm::{ChatMessage, LanguageModel, LlmError, ModelFactory};
use crate::settings::LoopSettings;
use crate::unit::Capabilities;

/// Smallest thing that starts like a PNG
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-data";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Default)]
struct PageBehavior {
    title: String,
    unreachable: Option<String>,
    network_busy: bool,
    missing_selectors: HashSet<String>,
    missing_texts: HashSet<String>,
    crash_on_screenshot: Option<usize>,
    panic_on_screenshot: bool,
    fail_close: bool,
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    calls: Vec<String>,
    screenshots: usize,
    closes: usize,
}

/// A page that records what was done to it. Clones share state.
#[derive(Debug, Clone)]
pub struct FakePage {
    behavior: Arc<PageBehavior>,
    state: Arc<Mutex<PageState>>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            behavior: Arc::new(PageBehavior {
                title: "Fake Page".to_string(),
                ..PageBehavior::default()
            }),
            state: Arc::new(Mutex::new(PageState {
                url: "about:blank".to_string(),
                ..PageState::default()
            })),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut PageBehavior)) -> Self {
        f(Arc::make_mut(&mut self.behavior));
        self
    }

    pub fn with_title(self, title: &str) -> Self {
        self.configure(|b| b.title = title.to_string())
    }

    /// Every navigation fails with `reason`
    pub fn unreachable(self, reason: &str) -> Self {
        self.configure(|b| b.unreachable = Some(reason.to_string()))
    }

    /// The network never goes quiet
    pub fn network_busy(self) -> Self {
        self.configure(|b| b.network_busy = true)
    }

    pub fn without_selector(self, selector: &str) -> Self {
        self.configure(|b| {
            b.missing_selectors.insert(selector.to_string());
        })
    }

    pub fn without_text(self, text: &str) -> Self {
        self.configure(|b| {
            b.missing_texts.insert(text.to_string());
        })
    }

    /// The screenshot with this zero-based index reports a crashed target
    pub fn crash_on_screenshot(self, index: usize) -> Self {
        self.configure(|b| b.crash_on_screenshot = Some(index))
    }

    pub fn panic_on_screenshot(self) -> Self {
        self.configure(|b| b.panic_on_screenshot = true)
    }

    pub fn fail_close(self) -> Self {
        self.configure(|b| b.fail_close = true)
    }

    /// Successful state-changing calls, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn screenshots(&self) -> usize {
        lock(&self.state).screenshots
    }

    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }

    fn record(&self, call: String) {
        lock(&self.state).calls.push(call);
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> browser::Result<()> {
        if let Some(reason) = &self.behavior.unreachable {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: reason.clone(),
            });
        }
        let mut state = lock(&self.state);
        state.url = url.to_string();
        state.calls.push(format!("goto {}", url));
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> browser::Result<()> {
        if self.behavior.network_busy {
            return Err(BrowserError::Timeout(format!("network still busy after {:?}", timeout)));
        }
        Ok(())
    }

    async fn url(&self) -> browser::Result<String> {
        Ok(lock(&self.state).url.clone())
    }

    async fn title(&self) -> browser::Result<String> {
        Ok(self.behavior.title.clone())
    }

    async fn screenshot(&self) -> browser::Result<Vec<u8>> {
        if self.behavior.panic_on_screenshot {
            panic!("screenshot exploded");
        }
        let mut state = lock(&self.state);
        let index = state.screenshots;
        state.screenshots += 1;
        if self.behavior.crash_on_screenshot == Some(index) {
            return Err(BrowserError::TargetCrashed);
        }
        Ok(FAKE_PNG.to_vec())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> browser::Result<()> {
        if self.behavior.missing_selectors.contains(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(format!("click {}", selector));
        Ok(())
    }

    async fn click_text(&self, text: &str, _timeout: Duration) -> browser::Result<()> {
        if self.behavior.missing_texts.contains(text) {
            return Err(BrowserError::ElementNotFound(format!("text \"{}\"", text)));
        }
        self.record(format!("click_text {}", text));
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, _timeout: Duration) -> browser::Result<()> {
        if self.behavior.missing_selectors.contains(selector) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        self.record(format!("fill {}={}", selector, text));
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i64) -> browser::Result<()> {
        self.record(format!("scroll_by {}", delta_y));
        Ok(())
    }

    async fn scroll_to_ratio(&self, ratio: f64) -> browser::Result<()> {
        self.record(format!("scroll_to {}", ratio));
        Ok(())
    }

    async fn close(&self) -> browser::Result<()> {
        lock(&self.state).closes += 1;
        if self.behavior.fail_close {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }
}

/// Hands out clones of one [`FakePage`], or fails every launch
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    page: FakePage,
    failure: Option<String>,
    launches: Arc<Mutex<Vec<LaunchOptions>>>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page,
            failure: None,
            launches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new(FakePage::new())
        }
    }

    pub fn launches(&self) -> Vec<LaunchOptions> {
        lock(&self.launches).clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> browser::Result<Box<dyn Page>> {
        lock(&self.launches).push(*options);
        if let Some(reason) = &self.failure {
            return Err(BrowserError::Launch {
                engine: options.kind.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(Box::new(self.page.clone()))
    }
}

#[derive(Debug, Default)]
struct ModelState {
    replies: VecDeque<String>,
    repeat: Option<String>,
    transcripts: Vec<Vec<ChatMessage>>,
    system_prompts: Vec<String>,
}

/// Replies from a script; records every conversation it is shown.
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    state: Arc<Mutex<ModelState>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        lock(&model.state).replies = replies.into_iter().map(Into::into).collect();
        model
    }

    /// Answer with `reply` once the script runs out
    pub fn then_repeat(self, reply: impl Into<String>) -> Self {
        lock(&self.state).repeat = Some(reply.into());
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).transcripts.len()
    }

    /// Conversation passed on each call
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.state).transcripts.clone()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        lock(&self.state).system_prompts.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[ChatMessage], system_prompt: &str) -> Result<String, LlmError> {
        let mut state = lock(&self.state);
        state.transcripts.push(messages.to_vec());
        state.system_prompts.push(system_prompt.to_string());
        if let Some(reply) = state.replies.pop_front() {
            return Ok(reply);
        }
        state
            .repeat
            .clone()
            .ok_or_else(|| LlmError::api("scripted", 500, "script exhausted"))
    }
}

/// Knows the real provider names but always returns its [`ScriptedModel`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedModelFactory {
    model: ScriptedModel,
    created: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl ScriptedModelFactory {
    pub fn new(model: ScriptedModel) -> Self {
        Self {
            model,
            created: Arc::default(),
        }
    }

    /// `(provider, model)` for each model created
    pub fn created(&self) -> Vec<(String, Option<String>)> {
        lock(&self.created).clone()
    }
}

impl ModelFactory for ScriptedModelFactory {
    fn create(
        &self,
        provider: &str,
        _api_key: &str,
        model: Option<&str>,
    ) -> Result<Box<dyn LanguageModel>, LlmError> {
        match provider.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" | "openai" | "gpt" => {
                lock(&self.created).push((provider.to_string(), model.map(String::from)));
                Ok(Box::new(self.model.clone()))
            }
            _ => Err(LlmError::UnknownProvider(provider.to_string())),
        }
    }
}

/// Loop settings with every pause removed
pub fn fast_settings() -> LoopSettings {
    LoopSettings {
        action_settle: Duration::ZERO,
        capture_settle: Duration::ZERO,
        max_wait: Duration::from_millis(10),
        ..LoopSettings::default()
    }
}

pub fn capabilities(launcher: FakeLauncher, models: ScriptedModelFactory) -> Capabilities {
    Capabilities::new(Arc::new(launcher), Arc::new(models), fast_settings())
}

/// A run config for `http://localhost:3000` writing into `artifacts_dir`
pub fn run_config(artifacts_dir: &Path, provider: Option<&str>) -> RunConfig {
    RunConfig {
        run_id: "run_test".to_string(),
        browser: "chromium".to_string(),
        base_url: "http://localhost:3000".to_string(),
        viewport: None,
        artifacts_dir: artifacts_dir.to_path_buf(),
        llm_provider: provider.map(String::from),
        llm_model: None,
        api_key: provider.map(|_| "sk-test".to_string()),
        scenario: ScenarioSpec {
            id: "sc_test".to_string(),
            title: "Pricing page".to_string(),
            description: "The pricing page lists three plans.".to_string(),
            start_path: Some("/pricing".to_string()),
        },
    }
}
