//! Browser process launcher
//!
//! Spawns the engine with remote debugging on an ephemeral port and a
//! throwaway profile, then reads the DevTools endpoint it prints on stderr.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use uuid::Uuid;

use crate::cdp::client::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{BrowserError, Result};
use crate::page::{BrowserKind, BrowserLauncher, LaunchOptions, Page};
use crate::session::BrowserSession;

const DEVTOOLS_BANNER: &str = "DevTools listening on ";

const CHROMIUM_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// Launch settings
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub headless: bool,
    /// Pass `--no-sandbox`; needed when running as root in containers
    pub no_sandbox: bool,
    pub chromium_path: Option<PathBuf>,
    pub firefox_path: Option<PathBuf>,
    /// How long to wait for the DevTools endpoint
    pub startup_timeout: Duration,
    /// Bound on every CDP command
    pub command_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: false,
            chromium_path: None,
            firefox_path: None,
            startup_timeout: Duration::from_secs(20),
            command_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl LaunchSettings {
    /// Defaults overridden by `CHROMIUM_PATH`, `FIREFOX_PATH`,
    /// `BROWSER_HEADLESS` and `BROWSER_NO_SANDBOX`
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(path) = std::env::var_os("CHROMIUM_PATH") {
            settings.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(path) = std::env::var_os("FIREFOX_PATH") {
            settings.firefox_path = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var("BROWSER_HEADLESS") {
            settings.headless = !is_falsy(&value);
        }
        if let Ok(value) = std::env::var("BROWSER_NO_SANDBOX") {
            settings.no_sandbox = !is_falsy(&value);
        }
        settings
    }
}

fn is_falsy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}

/// Launches Chromium-family (and CDP-capable Firefox) browsers
pub struct ChromeLauncher {
    settings: LaunchSettings,
}

impl ChromeLauncher {
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    /// Resolve the executable for an engine
    pub fn executable(&self, kind: BrowserKind) -> Result<PathBuf> {
        match kind {
            BrowserKind::Chromium => self
                .settings
                .chromium_path
                .clone()
                .or_else(|| CHROMIUM_CANDIDATES.iter().find_map(|name| find_on_path(name)))
                .ok_or_else(|| BrowserError::Launch {
                    engine: kind.to_string(),
                    reason: "no Chromium executable found on PATH; set CHROMIUM_PATH".to_string(),
                }),
            BrowserKind::Firefox => self
                .settings
                .firefox_path
                .clone()
                .or_else(|| find_on_path("firefox"))
                .ok_or_else(|| BrowserError::Launch {
                    engine: kind.to_string(),
                    reason: "no Firefox executable found on PATH; set FIREFOX_PATH".to_string(),
                }),
            BrowserKind::Webkit => Err(BrowserError::UnsupportedEngine(kind.to_string())),
        }
    }

    fn args(&self, kind: BrowserKind, profile_dir: &Path, options: &LaunchOptions) -> Vec<String> {
        let mut args = Vec::new();
        match kind {
            BrowserKind::Firefox => {
                if self.settings.headless {
                    args.push("--headless".to_string());
                }
                args.push("--remote-debugging-port".to_string());
                args.push("0".to_string());
                args.push("--profile".to_string());
                args.push(profile_dir.display().to_string());
                args.push("--no-remote".to_string());
                args.push(format!("--width={}", options.width));
                args.push(format!("--height={}", options.height));
            }
            _ => {
                if self.settings.headless {
                    args.push("--headless=new".to_string());
                }
                if self.settings.no_sandbox {
                    args.push("--no-sandbox".to_string());
                }
                args.push("--remote-debugging-port=0".to_string());
                args.push(format!("--user-data-dir={}", profile_dir.display()));
                args.extend(
                    [
                        "--no-first-run",
                        "--no-default-browser-check",
                        "--disable-gpu",
                        "--disable-dev-shm-usage",
                        "--disable-background-networking",
                        "--hide-scrollbars",
                        "--mute-audio",
                    ]
                    .map(String::from),
                );
                args.push(format!("--window-size={},{}", options.width, options.height));
            }
        }
        args.push("about:blank".to_string());
        args
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new(LaunchSettings::from_env())
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Page>> {
        let kind = options.kind;
        let executable = self.executable(kind)?;
        let profile_dir = std::env::temp_dir().join(format!("verify-profile-{}", Uuid::now_v7()));
        tokio::fs::create_dir_all(&profile_dir).await?;

        tracing::info!("Launching {} ({})", kind, executable.display());

        let spawned = Command::new(&executable)
            .args(self.args(kind, &profile_dir, options))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                return Err(BrowserError::Launch {
                    engine: kind.to_string(),
                    reason: format!("{}: {}", executable.display(), e),
                });
            }
        };

        let endpoint = match child.stderr.take() {
            Some(stderr) => read_devtools_endpoint(kind, stderr, self.settings.startup_timeout).await,
            None => Err(BrowserError::Launch {
                engine: kind.to_string(),
                reason: "stderr not captured".to_string(),
            }),
        };

        let session = match endpoint {
            Ok(ws_url) => {
                tracing::debug!("DevTools endpoint: {}", ws_url);
                BrowserSession::connect(
                    kind,
                    child,
                    &ws_url,
                    profile_dir.clone(),
                    options,
                    self.settings.command_timeout,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match session {
            Ok(session) => Ok(Box::new(session)),
            Err(e) => {
                // The child, if still owned here, is killed on drop
                let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                Err(e)
            }
        }
    }
}

/// Read stderr until the DevTools banner appears; keep draining afterwards
/// so the browser never blocks on a full pipe.
async fn read_devtools_endpoint(
    kind: BrowserKind,
    stderr: ChildStderr,
    startup_timeout: Duration,
) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();

    let found = tokio::time::timeout(startup_timeout, async {
        while let Some(line) = lines.next_line().await? {
            if let Some(ws_url) = parse_devtools_banner(&line) {
                return Ok::<_, std::io::Error>(Some(ws_url));
            }
            tracing::trace!("[{}] {}", kind, line);
        }
        Ok(None)
    })
    .await;

    let ws_url = match found {
        Ok(Ok(Some(ws_url))) => ws_url,
        Ok(Ok(None)) => {
            return Err(BrowserError::Launch {
                engine: kind.to_string(),
                reason: "browser exited before exposing a DevTools endpoint".to_string(),
            })
        }
        Ok(Err(e)) => return Err(BrowserError::Io(e)),
        Err(_) => {
            return Err(BrowserError::Launch {
                engine: kind.to_string(),
                reason: format!("no DevTools endpoint after {:?}", startup_timeout),
            })
        }
    };

    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!("[{}] {}", kind, line);
        }
    });

    Ok(ws_url)
}

fn parse_devtools_banner(line: &str) -> Option<String> {
    let rest = line.split_once(DEVTOOLS_BANNER)?.1.trim();
    if rest.starts_with("ws://") || rest.starts_with("wss://") {
        Some(rest.to_string())
    } else {
        None
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
