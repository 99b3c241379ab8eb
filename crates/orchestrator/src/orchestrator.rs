//! Run lifecycle
//!
//! [`Orchestrator::start_run`] persists the run, launches its unit and
//! hands the unit's message stream to a supervisor task. The supervisor is
//! the only writer of the run after start: it records artifacts and error
//! annotations, relays every event to the bus, and finalizes the run on the
//! first verdict, or synthesizes one when the unit dies silently.

use chrono::Utc;
use dashmap::DashMap;
use protocol::{LiveEvent, RunConfig, ScenarioSpec, ScreenshotRef, UnitCommand, UnitMessage, VerdictKind, Viewport};
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

use crate::bus::EventBus;
use crate::error::{OrchestratorError, Result, StoreError};
use crate::ids::{new_id, ARTIFACT_PREFIX, RUN_PREFIX};
use crate::launcher::{ProcessLauncher, UnitExit, UnitHandle, UnitLauncher};
use crate::settings::OrchestratorSettings;
use crate::store::{Artifact, InMemoryStore, NewRun, RunOutcome, RunStore, ScenarioStatus};
use crate::stream::LiveStream;

const DEFAULT_BROWSER: &str = "chromium";
const SCREENSHOT_MIME: &str = "image/png";
const RUN_INACTIVE: &str = "Run is not active or already completed";

/// Everything needed to start one run of a scenario against a profile
#[derive(Debug, Clone)]
pub struct StartParams {
    pub scenario: ScenarioSpec,
    pub profile_id: String,
    pub base_url: String,
    /// Engine name; `chromium` when unset
    pub browser: Option<String>,
    /// `WIDTHxHEIGHT`; unparseable values fall back to the unit's default
    pub viewport: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub api_key: Option<String>,
    pub notes: Option<String>,
}

struct ActiveRun {
    /// Keeps the unit's command channel open while the run is live
    _commands: mpsc::UnboundedSender<UnitCommand>,
    started: Instant,
}

struct Inner {
    store: Arc<dyn RunStore>,
    launcher: Arc<dyn UnitLauncher>,
    bus: EventBus,
    settings: OrchestratorSettings,
    active: DashMap<String, ActiveRun>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        launcher: Arc<dyn UnitLauncher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                launcher,
                bus: EventBus::new(),
                settings,
                active: DashMap::new(),
            }),
        }
    }

    /// In-memory store and `verify-worker` child processes
    pub fn with_process_units(settings: OrchestratorSettings) -> Self {
        let launcher = ProcessLauncher::locate(settings.worker_bin.clone());
        tracing::info!("[Orchestrator] Using worker binary {}", launcher.program().display());
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(launcher), settings)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.inner.store
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Start a run and return its id without waiting for it to finish
    pub async fn start_run(&self, params: StartParams) -> Result<String> {
        let inner = &self.inner;
        let run_id = new_id(RUN_PREFIX);
        let started = Instant::now();

        // Nothing is persisted until the run can actually be handed to a unit
        let artifacts_dir = inner.settings.artifacts_dir(&run_id);
        tokio::fs::create_dir_all(&artifacts_dir).await?;

        let viewport = params.viewport.as_deref().and_then(|spec| {
            let parsed = Viewport::parse(spec);
            if parsed.is_none() {
                tracing::warn!("[Orchestrator] Ignoring invalid viewport {:?} for {}", spec, run_id);
            }
            parsed
        });

        inner
            .store
            .create_run(NewRun {
                id: run_id.clone(),
                scenario_id: params.scenario.id.clone(),
                profile_id: params.profile_id.clone(),
                notes: params.notes.clone(),
            })
            .await?;
        if let Err(e) = inner
            .store
            .set_scenario_status(&params.scenario.id, ScenarioStatus::Running)
            .await
        {
            let err = OrchestratorError::from(e);
            inner
                .finalize(&run_id, VerdictKind::Error, err.to_string(), None, elapsed_ms(started))
                .await;
            return Err(err);
        }

        let config = RunConfig {
            run_id: run_id.clone(),
            browser: params
                .browser
                .filter(|b| !b.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
            base_url: params.base_url,
            viewport,
            artifacts_dir,
            llm_provider: params.llm_provider,
            llm_model: params.llm_model,
            api_key: params.api_key,
            scenario: params.scenario,
        };

        let handle = match inner.launcher.launch(&run_id).await {
            Ok(handle) => handle,
            Err(e) => {
                let err = match e {
                    OrchestratorError::Launch { .. } => e,
                    other => OrchestratorError::Launch {
                        run_id: run_id.clone(),
                        reason: other.to_string(),
                    },
                };
                tracing::error!("[Orchestrator] {}", err);
                inner
                    .finalize(&run_id, VerdictKind::Error, err.to_string(), None, elapsed_ms(started))
                    .await;
                return Err(err);
            }
        };

        let UnitHandle {
            commands,
            messages,
            exit,
        } = handle;
        if commands.send(UnitCommand::Start { config }).is_err() {
            tracing::warn!("[Orchestrator] Unit for {} closed before start", run_id);
        }
        inner.active.insert(
            run_id.clone(),
            ActiveRun {
                _commands: commands,
                started,
            },
        );
        tracing::info!("[Orchestrator] Started {}", run_id);

        tokio::spawn(self.inner.clone().supervise(run_id.clone(), messages, exit));
        Ok(run_id)
    }

    pub fn is_run_active(&self, run_id: &str) -> bool {
        self.inner.active.contains_key(run_id)
    }

    pub fn active_runs(&self) -> Vec<String> {
        self.inner.active.iter().map(|r| r.key().clone()).collect()
    }

    /// Events of a running run from now until its verdict. A run that is
    /// not active yields a single error event.
    pub fn live_stream(&self, run_id: &str) -> LiveStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = tx.clone();
        let subscription = self.inner.bus.subscribe(run_id, move |event| {
            let _ = sink.send(event.clone());
        });
        let keepalive = self.inner.settings.keepalive_interval;

        // Subscribe before checking: a verdict is broadcast only after the
        // run leaves the active set.
        if self.is_run_active(run_id) {
            return LiveStream::new(rx, Some(subscription), keepalive);
        }
        drop(subscription);
        let _ = tx.send(LiveEvent::Error {
            error: RUN_INACTIVE.to_string(),
        });
        LiveStream::new(rx, None, keepalive)
    }

    /// Stored screenshot bytes of an artifact
    pub async fn artifact_file(&self, artifact_id: &str) -> Result<(Artifact, Vec<u8>)> {
        let artifact = self
            .inner
            .store
            .get_artifact(artifact_id)
            .await?
            .ok_or_else(|| StoreError::ArtifactNotFound(artifact_id.to_string()))?;
        if !is_plain_filename(&artifact.filename) {
            return Err(OrchestratorError::UnsafeArtifactPath(artifact.id));
        }
        let path = self.inner.settings.artifacts_dir(&artifact.run_id).join(&artifact.filename);
        let bytes = tokio::fs::read(&path).await?;
        Ok((artifact, bytes))
    }
}

impl Inner {
    async fn supervise(
        self: Arc<Self>,
        run_id: String,
        mut messages: mpsc::UnboundedReceiver<UnitMessage>,
        exit: oneshot::Receiver<UnitExit>,
    ) {
        let mut finished = false;
        loop {
            let message = if finished {
                match tokio::time::timeout(self.settings.unit_exit_grace, messages.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        tracing::warn!("[Orchestrator] Unit for {} still running after its verdict; detaching", run_id);
                        break;
                    }
                }
            } else {
                messages.recv().await
            };
            let Some(message) = message else {
                break;
            };
            if finished {
                tracing::debug!("[Orchestrator] Ignoring message after verdict for {}: {:?}", run_id, message);
                continue;
            }
            finished = self.handle_message(&run_id, message).await;
        }

        if finished {
            return;
        }
        let exit = exit
            .await
            .unwrap_or_else(|_| UnitExit::Lost("exit status unavailable".to_string()));
        tracing::warn!("[Orchestrator] Unit for {} ended without a verdict: {:?}", run_id, exit);
        let duration_ms = self
            .active
            .get(&run_id)
            .map(|r| elapsed_ms(r.started))
            .unwrap_or(0);
        self.finalize(&run_id, VerdictKind::Error, exit.describe(), None, duration_ms)
            .await;
    }

    /// Returns true when the message ended the run
    async fn handle_message(&self, run_id: &str, message: UnitMessage) -> bool {
        match message {
            UnitMessage::Verdict {
                verdict,
                summary,
                reasoning,
                duration_ms,
            } => {
                self.finalize(run_id, verdict, summary, reasoning, duration_ms).await;
                true
            }
            UnitMessage::Step {
                step_index,
                action,
                detail,
                screenshot,
            } => {
                let screenshot_url = match screenshot {
                    Some(shot) => self.record_artifact(run_id, step_index, shot).await,
                    None => None,
                };
                self.bus.broadcast(
                    run_id,
                    &LiveEvent::Step {
                        step_index,
                        action,
                        detail,
                        screenshot_url,
                    },
                );
                false
            }
            UnitMessage::Error { error } => {
                tracing::warn!("[Orchestrator] {} reported: {}", run_id, error);
                if let Err(e) = self.store.record_error(run_id, &error).await {
                    tracing::warn!("[Orchestrator] Could not record error for {}: {}", run_id, e);
                }
                self.bus.broadcast(run_id, &LiveEvent::Error { error });
                false
            }
            think @ UnitMessage::Think { .. } => {
                self.bus.broadcast(run_id, &LiveEvent::from(think));
                false
            }
        }
    }

    async fn record_artifact(&self, run_id: &str, step_index: u32, shot: ScreenshotRef) -> Option<String> {
        let artifact = Artifact {
            id: new_id(ARTIFACT_PREFIX),
            run_id: run_id.to_string(),
            step_index,
            filename: shot.filename,
            caption: shot.caption,
            mime_type: SCREENSHOT_MIME.to_string(),
            size_bytes: shot.size_bytes,
            created_at: Utc::now(),
        };
        let url = self.settings.artifact_url(&artifact.id);
        match self.store.insert_artifact(artifact).await {
            Ok(()) => Some(url),
            Err(e) => {
                tracing::warn!("[Orchestrator] Could not record screenshot of step {} for {}: {}", step_index, run_id, e);
                None
            }
        }
    }

    /// Persist the verdict, leave the active set, then tell observers
    async fn finalize(
        &self,
        run_id: &str,
        verdict: VerdictKind,
        summary: String,
        reasoning: Option<String>,
        duration_ms: u64,
    ) {
        let outcome = RunOutcome {
            verdict,
            summary: summary.clone(),
            reasoning: reasoning.clone(),
            duration_ms,
        };
        match self.store.finish_run(run_id, outcome).await {
            Ok(run) => {
                if let Err(e) = self
                    .store
                    .set_scenario_status(&run.scenario_id, verdict.into())
                    .await
                {
                    tracing::warn!("[Orchestrator] Could not update scenario {}: {}", run.scenario_id, e);
                }
            }
            Err(e) => tracing::warn!("[Orchestrator] Could not finish {}: {}", run_id, e),
        }

        self.active.remove(run_id);
        tracing::info!("[Orchestrator] {} finished: {} ({})", run_id, verdict.as_str(), summary);

        self.bus.broadcast(
            run_id,
            &LiveEvent::Verdict {
                verdict,
                summary,
                reasoning,
                duration_ms,
            },
        );
    }
}

fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains('\\')
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RunState;
    use agent::testing::{capabilities, FakeLauncher, FakePage, ScriptedModelFactory, FAKE_PNG};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    use crate::launcher::InProcessLauncher;

    /// What a scripted unit does once it receives its start command
    #[derive(Clone)]
    struct Script {
        messages: Vec<UnitMessage>,
        exit: UnitExit,
        gate: Option<Arc<Notify>>,
    }

    impl Script {
        fn new(messages: Vec<UnitMessage>, exit: UnitExit) -> Self {
            Self {
                messages,
                exit,
                gate: None,
            }
        }

        /// Hold the messages back until `gate` is notified
        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }
    }

    #[derive(Clone)]
    struct ScriptedLauncher {
        script: Option<Script>,
        configs: Arc<Mutex<Vec<RunConfig>>>,
    }

    impl ScriptedLauncher {
        fn new(script: Script) -> Self {
            Self {
                script: Some(script),
                configs: Arc::default(),
            }
        }

        fn failing() -> Self {
            Self {
                script: None,
                configs: Arc::default(),
            }
        }

        fn configs(&self) -> Vec<RunConfig> {
            self.configs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UnitLauncher for ScriptedLauncher {
        async fn launch(&self, run_id: &str) -> Result<UnitHandle> {
            let Some(script) = self.script.clone() else {
                return Err(OrchestratorError::Launch {
                    run_id: run_id.to_string(),
                    reason: "no such file or directory".to_string(),
                });
            };
            let (command_tx, mut command_rx) = mpsc::unbounded_channel();
            let (message_tx, message_rx) = mpsc::unbounded_channel();
            let (exit_tx, exit_rx) = oneshot::channel();
            let configs = self.configs.clone();

            tokio::spawn(async move {
                let Some(UnitCommand::Start { config }) = command_rx.recv().await else {
                    let _ = exit_tx.send(UnitExit::Code(2));
                    return;
                };
                configs.lock().unwrap().push(config.clone());
                if let Some(gate) = &script.gate {
                    gate.notified().await;
                }
                for message in script.messages {
                    if let UnitMessage::Step {
                        screenshot: Some(shot), ..
                    } = &message
                    {
                        tokio::fs::write(config.artifacts_dir.join(&shot.filename), FAKE_PNG)
                            .await
                            .unwrap();
                    }
                    let _ = message_tx.send(message);
                }
                drop(message_tx);
                let _ = exit_tx.send(script.exit);
            });

            Ok(UnitHandle {
                commands: command_tx,
                messages: message_rx,
                exit: exit_rx,
            })
        }
    }

    fn settings(dir: &Path) -> OrchestratorSettings {
        OrchestratorSettings {
            data_dir: dir.to_path_buf(),
            ..OrchestratorSettings::default()
        }
    }

    fn orchestrator(dir: &Path, launcher: impl UnitLauncher + 'static) -> Orchestrator {
        Orchestrator::new(Arc::new(InMemoryStore::new()), Arc::new(launcher), settings(dir))
    }

    fn params() -> StartParams {
        StartParams {
            scenario: ScenarioSpec {
                id: "sc_pricing".to_string(),
                title: "Pricing page".to_string(),
                description: "Three plans are listed.".to_string(),
                start_path: Some("/pricing".to_string()),
            },
            profile_id: "pr_local".to_string(),
            base_url: "http://localhost:3000".to_string(),
            browser: None,
            viewport: Some("1440x900".to_string()),
            llm_provider: None,
            llm_model: None,
            api_key: None,
            notes: Some("nightly".to_string()),
        }
    }

    fn think(step_index: u32) -> UnitMessage {
        UnitMessage::Think {
            step_index,
            observation: "A pricing table".to_string(),
            reasoning: "Scroll to see all plans".to_string(),
            action: "scroll".to_string(),
        }
    }

    fn step(step_index: u32, with_screenshot: bool) -> UnitMessage {
        UnitMessage::Step {
            step_index,
            action: "scroll".to_string(),
            detail: Some("Scrolled down 500px".to_string()),
            screenshot: with_screenshot.then(|| ScreenshotRef {
                filename: format!("step-{:03}.png", step_index),
                caption: "Pricing (http://localhost:3000/pricing)".to_string(),
                size_bytes: FAKE_PNG.len() as u64,
            }),
        }
    }

    fn verdict(verdict: VerdictKind, summary: &str) -> UnitMessage {
        UnitMessage::Verdict {
            verdict,
            summary: summary.to_string(),
            reasoning: None,
            duration_ms: 1200,
        }
    }

    async fn collect(mut live: LiveStream) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(10), live.next())
            .await
            .expect("live stream stalled")
        {
            if event != LiveEvent::Keepalive {
                events.push(event);
            }
        }
        events
    }

    /// Let the supervisor drain whatever is still queued
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_unit_crash_synthesizes_error_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(vec![think(0), step(0, false)], UnitExit::Code(137)).gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher.clone());

        let run_id = orch.start_run(params()).await.unwrap();
        assert!(orch.is_run_active(&run_id));
        assert_eq!(orch.active_runs(), vec![run_id.clone()]);
        let live = orch.live_stream(&run_id);
        gate.notify_one();

        let events = collect(live).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], LiveEvent::Think { step_index: 0, .. }));
        assert!(matches!(
            events[1],
            LiveEvent::Step {
                screenshot_url: None,
                ..
            }
        ));
        match &events[2] {
            LiveEvent::Verdict { verdict, summary, .. } => {
                assert_eq!(*verdict, VerdictKind::Error);
                assert_eq!(summary, "Worker exited unexpectedly with code 137");
            }
            other => panic!("expected verdict, got {:?}", other),
        }

        let run = orch.store().get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Error);
        assert_eq!(run.summary.as_deref(), Some("Worker exited unexpectedly with code 137"));
        assert_eq!(run.notes.as_deref(), Some("nightly"));
        assert_eq!(
            orch.store().scenario_status("sc_pricing").await.unwrap(),
            ScenarioStatus::Error
        );
        assert!(!orch.is_run_active(&run_id));
    }

    #[tokio::test]
    async fn test_start_builds_run_config() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(vec![verdict(VerdictKind::Passed, "ok")], UnitExit::Code(0)).gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher.clone());

        let run_id = orch.start_run(params()).await.unwrap();
        assert!(run_id.starts_with("run_"));
        assert_eq!(
            orch.store().scenario_status("sc_pricing").await.unwrap(),
            ScenarioStatus::Running
        );
        assert!(dir.path().join("artifacts").join(&run_id).is_dir());

        let live = orch.live_stream(&run_id);
        gate.notify_one();
        collect(live).await;

        let configs = launcher.configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].run_id, run_id);
        assert_eq!(configs[0].browser, "chromium");
        assert_eq!(
            configs[0].viewport,
            Some(Viewport {
                width: 1440,
                height: 900
            })
        );
        assert_eq!(configs[0].start_url(), "http://localhost:3000/pricing");
    }

    #[tokio::test]
    async fn test_invalid_viewport_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(Script::new(
            vec![verdict(VerdictKind::Passed, "ok")],
            UnitExit::Code(0),
        ));
        let orch = orchestrator(dir.path(), launcher.clone());

        let mut p = params();
        p.viewport = Some("huge".to_string());
        p.browser = Some("firefox".to_string());
        orch.start_run(p).await.unwrap();
        settle().await;

        let configs = launcher.configs();
        assert_eq!(configs[0].viewport, None);
        assert_eq!(configs[0].browser, "firefox");
    }

    #[tokio::test]
    async fn test_screenshots_become_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(
                vec![think(0), step(0, true), verdict(VerdictKind::Passed, "All plans shown")],
                UnitExit::Code(0),
            )
            .gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher);

        let run_id = orch.start_run(params()).await.unwrap();
        let live = orch.live_stream(&run_id);
        gate.notify_one();
        let events = collect(live).await;

        let artifacts = orch.store().list_artifacts(&run_id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        let artifact = &artifacts[0];
        assert!(artifact.id.starts_with("art_"));
        assert_eq!(artifact.filename, "step-000.png");
        assert_eq!(artifact.mime_type, "image/png");

        let expected_url = format!("/api/artifacts/{}/file", artifact.id);
        assert!(matches!(
            &events[1],
            LiveEvent::Step { screenshot_url: Some(url), .. } if *url == expected_url
        ));

        let (found, bytes) = orch.artifact_file(&artifact.id).await.unwrap();
        assert_eq!(found.run_id, run_id);
        assert_eq!(bytes, FAKE_PNG);

        let run = orch.store().get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Passed);
        assert_eq!(run.duration_ms, Some(1200));
        assert_eq!(
            orch.store().scenario_status("sc_pricing").await.unwrap(),
            ScenarioStatus::Passed
        );
    }

    #[tokio::test]
    async fn test_messages_after_verdict_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(
                vec![
                    verdict(VerdictKind::Passed, "first"),
                    verdict(VerdictKind::Failed, "second"),
                    UnitMessage::Error {
                        error: "late".to_string(),
                    },
                ],
                UnitExit::Code(0),
            )
            .gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher);

        let run_id = orch.start_run(params()).await.unwrap();
        let live = orch.live_stream(&run_id);
        gate.notify_one();
        let events = collect(live).await;
        settle().await;

        assert_eq!(events.len(), 1);
        let run = orch.store().get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Passed);
        assert_eq!(run.summary.as_deref(), Some("first"));
        assert_eq!(run.error_message, None);
    }

    #[tokio::test]
    async fn test_unit_errors_annotate_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(
                vec![
                    UnitMessage::Error {
                        error: "net::ERR_CONNECTION_REFUSED".to_string(),
                    },
                    verdict(VerdictKind::Error, "Worker failed: net::ERR_CONNECTION_REFUSED"),
                ],
                UnitExit::Code(0),
            )
            .gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher);

        let run_id = orch.start_run(params()).await.unwrap();
        let live = orch.live_stream(&run_id);
        gate.notify_one();
        let events = collect(live).await;

        assert!(matches!(&events[0], LiveEvent::Error { error } if error.contains("REFUSED")));
        assert!(events[1].is_terminal());
        let run = orch.store().get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Error);
        assert_eq!(run.error_message.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
    }

    #[tokio::test]
    async fn test_launch_failure_finishes_run_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ScriptedLauncher::failing());

        let err = orch.start_run(params()).await.err().unwrap();
        let OrchestratorError::Launch { run_id, .. } = &err else {
            panic!("expected launch error, got {:?}", err);
        };

        let run = orch.store().get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.state, RunState::Error);
        assert!(run
            .summary
            .unwrap()
            .starts_with("Failed to launch execution unit"));
        assert_eq!(
            orch.store().scenario_status("sc_pricing").await.unwrap(),
            ScenarioStatus::Error
        );
        assert!(orch.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_unusable_data_dir_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("data");
        std::fs::write(&not_a_dir, b"occupied").unwrap();
        let launcher = ScriptedLauncher::new(Script::new(
            vec![verdict(VerdictKind::Passed, "ok")],
            UnitExit::Code(0),
        ));
        let orch = orchestrator(&not_a_dir, launcher.clone());

        let err = tokio_test::assert_err!(orch.start_run(params()).await);
        assert!(matches!(err, OrchestratorError::Io(_)));

        assert_eq!(
            orch.store().scenario_status("sc_pricing").await.unwrap(),
            ScenarioStatus::Pending
        );
        assert!(orch.active_runs().is_empty());
        assert!(launcher.configs().is_empty());
    }

    #[tokio::test]
    async fn test_stream_of_inactive_run() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ScriptedLauncher::failing());

        let events = collect(orch.live_stream("run_missing")).await;
        assert_eq!(
            events,
            vec![LiveEvent::Error {
                error: "Run is not active or already completed".to_string()
            }]
        );
        assert_eq!(orch.bus().run_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_run_gets_keepalives() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let launcher = ScriptedLauncher::new(
            Script::new(vec![verdict(VerdictKind::Passed, "ok")], UnitExit::Code(0)).gated(gate.clone()),
        );
        let orch = orchestrator(dir.path(), launcher);

        let run_id = orch.start_run(params()).await.unwrap();
        let mut live = orch.live_stream(&run_id);

        assert_eq!(live.next().await, Some(LiveEvent::Keepalive));
        assert_eq!(live.next().await, Some(LiveEvent::Keepalive));
        gate.notify_one();
        assert!(live.next().await.unwrap().is_terminal());
        assert_eq!(live.next().await, None);
    }

    #[tokio::test]
    async fn test_unsafe_artifact_filename_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), ScriptedLauncher::failing());
        let store = orch.store().clone();
        store
            .create_run(NewRun {
                id: "run_1".to_string(),
                scenario_id: "sc_1".to_string(),
                profile_id: "pr_1".to_string(),
                notes: None,
            })
            .await
            .unwrap();
        store
            .insert_artifact(Artifact {
                id: "art_escape".to_string(),
                run_id: "run_1".to_string(),
                step_index: 0,
                filename: "../../outside.png".to_string(),
                caption: String::new(),
                mime_type: SCREENSHOT_MIME.to_string(),
                size_bytes: 0,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(
            orch.artifact_file("art_escape").await,
            Err(OrchestratorError::UnsafeArtifactPath(_))
        ));

        assert!(!is_plain_filename("../secrets.png"));
        assert!(!is_plain_filename("/etc/passwd"));
        assert!(!is_plain_filename("a\\b.png"));
        assert!(!is_plain_filename(""));
        assert!(is_plain_filename("step-000-scroll-top.png"));

        assert!(matches!(
            orch.artifact_file("art_missing").await,
            Err(OrchestratorError::Store(StoreError::ArtifactNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_fallback_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new().with_title("Pricing");
        let launcher = InProcessLauncher::new(capabilities(
            FakeLauncher::new(page.clone()),
            ScriptedModelFactory::default(),
        ));
        let orch = orchestrator(dir.path(), launcher);

        let run_id = orch.start_run(params()).await.unwrap();
        let events = collect(orch.live_stream(&run_id)).await;

        let steps: Vec<&LiveEvent> = events
            .iter()
            .filter(|e| matches!(e, LiveEvent::Step { .. }))
            .collect();
        assert_eq!(steps.len(), 5);
        for (i, event) in steps.iter().enumerate() {
            let LiveEvent::Step {
                step_index,
                screenshot_url,
                ..
            } = event
            else {
                unreachable!()
            };
            assert_eq!(*step_index as usize, i);
            assert!(screenshot_url.is_some());
        }
        assert!(matches!(
            events.last(),
            Some(LiveEvent::Verdict {
                verdict: VerdictKind::Passed,
                ..
            })
        ));

        let artifacts = orch.store().list_artifacts(&run_id).await.unwrap();
        assert_eq!(artifacts.len(), 5);
        for artifact in &artifacts {
            let (_, bytes) = orch.artifact_file(&artifact.id).await.unwrap();
            assert_eq!(bytes, FAKE_PNG);
        }
        assert_eq!(page.closes(), 1);
        assert_eq!(
            orch.store().get_run(&run_id).await.unwrap().unwrap().state,
            RunState::Passed
        );
    }
}
