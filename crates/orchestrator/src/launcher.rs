//! Execution unit launchers
//!
//! A launched unit is three channels: commands in, messages out, and a
//! one-shot exit report. The exit report is sent only after the last
//! message, so a supervisor that drains `messages` first sees everything
//! the unit said before learning how it ended.

use agent::{Capabilities, Emitter};
use async_trait::async_trait;
use protocol::{UnitCommand, UnitMessage};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::error::{OrchestratorError, Result};

const WORKER_BIN: &str = "verify-worker";

/// How a unit ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    Code(i32),
    Signal(i32),
    Panicked(String),
    /// The exit status could not be collected
    Lost(String),
}

impl UnitExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return UnitExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return UnitExit::Signal(signal);
            }
        }
        UnitExit::Lost(status.to_string())
    }

    /// Verdict summary for a unit that ended without a verdict
    pub fn describe(&self) -> String {
        match self {
            UnitExit::Code(code) => format!("Worker exited unexpectedly with code {}", code),
            UnitExit::Signal(signal) => format!("Worker terminated by signal {}", signal),
            UnitExit::Panicked(message) => format!("Worker panicked: {}", message),
            UnitExit::Lost(reason) => format!("Worker was lost: {}", reason),
        }
    }
}

pub struct UnitHandle {
    pub commands: mpsc::UnboundedSender<UnitCommand>,
    pub messages: mpsc::UnboundedReceiver<UnitMessage>,
    pub exit: oneshot::Receiver<UnitExit>,
}

#[async_trait]
pub trait UnitLauncher: Send + Sync {
    async fn launch(&self, run_id: &str) -> Result<UnitHandle>;
}

/// Runs each unit as a `verify-worker` child process speaking JSON lines
/// over stdio. The child is killed if its message receiver goes away.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The configured binary, else `verify-worker` next to the current
    /// executable, else `verify-worker` from `PATH`
    pub fn locate(configured: Option<PathBuf>) -> Self {
        let program = configured
            .or_else(|| {
                let sibling = std::env::current_exe().ok()?.parent()?.join(WORKER_BIN);
                sibling.is_file().then_some(sibling)
            })
            .unwrap_or_else(|| PathBuf::from(WORKER_BIN));
        Self::new(program)
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl UnitLauncher for ProcessLauncher {
    async fn launch(&self, run_id: &str) -> Result<UnitHandle> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::Launch {
                run_id: run_id.to_string(),
                reason: format!("{}: {}", self.program.display(), e),
            })?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(OrchestratorError::Launch {
                run_id: run_id.to_string(),
                reason: "child stdio was not captured".to_string(),
            });
        };
        tracing::info!(
            "[ProcessLauncher] Started {} for {} (pid {:?})",
            self.program.display(),
            run_id,
            child.id()
        );

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<UnitCommand>();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let mut line = match serde_json::to_string(&command) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("[ProcessLauncher] Could not encode command: {}", e);
                        continue;
                    }
                };
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::warn!("[ProcessLauncher] Unit stdin closed: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    tracing::warn!("[ProcessLauncher] Unit stdin flush failed: {}", e);
                    break;
                }
            }
        });

        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<UnitMessage>(&line) {
                                Ok(message) => {
                                    if message_tx.send(message).is_err() {
                                        break;
                                    }
                                }
                                Err(_) => tracing::debug!("[ProcessLauncher] {}: non-protocol output: {}", run_id, line),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("[ProcessLauncher] {}: reading unit output failed: {}", run_id, e);
                            break;
                        }
                    },
                    _ = message_tx.closed() => {
                        tracing::debug!("[ProcessLauncher] {}: supervisor gone, stopping unit", run_id);
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("[ProcessLauncher] {}: kill failed: {}", run_id, e);
                        }
                        break;
                    }
                }
            }

            let exit = match child.wait().await {
                Ok(status) => UnitExit::from_status(status),
                Err(e) => UnitExit::Lost(e.to_string()),
            };
            tracing::debug!("[ProcessLauncher] {}: unit ended ({:?})", run_id, exit);
            drop(message_tx);
            let _ = exit_tx.send(exit);
        });

        Ok(UnitHandle {
            commands: command_tx,
            messages: message_rx,
            exit: exit_rx,
        })
    }
}

/// Runs each unit as a tokio task in this process. A panic that escapes the
/// unit ends only that task and is reported as its exit.
#[derive(Clone)]
pub struct InProcessLauncher {
    capabilities: Capabilities,
}

impl InProcessLauncher {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl UnitLauncher for InProcessLauncher {
    async fn launch(&self, run_id: &str) -> Result<UnitHandle> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (emitter, message_rx) = Emitter::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let capabilities = self.capabilities.clone();
        let unit = tokio::spawn(async move { agent::serve(command_rx, &capabilities, emitter).await });

        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let exit = match unit.await {
                Ok(()) => UnitExit::Code(0),
                Err(e) if e.is_panic() => UnitExit::Panicked(panic_text(e.into_panic())),
                Err(e) => UnitExit::Lost(e.to_string()),
            };
            tracing::debug!("[InProcessLauncher] {}: unit ended ({:?})", run_id, exit);
            let _ = exit_tx.send(exit);
        });

        Ok(UnitHandle {
            commands: command_tx,
            messages: message_rx,
            exit: exit_rx,
        })
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::testing::{capabilities, run_config, FakeLauncher, FakePage, ScriptedModelFactory};
    use protocol::VerdictKind;

    #[test]
    fn test_exit_descriptions() {
        assert_eq!(
            UnitExit::Code(137).describe(),
            "Worker exited unexpectedly with code 137"
        );
        assert_eq!(UnitExit::Signal(9).describe(), "Worker terminated by signal 9");
        assert_eq!(
            UnitExit::Panicked("boom".to_string()).describe(),
            "Worker panicked: boom"
        );
    }

    #[test]
    fn test_locate_prefers_configured_binary() {
        let launcher = ProcessLauncher::locate(Some(PathBuf::from("/opt/verify/bin/worker")));
        assert_eq!(launcher.program(), &PathBuf::from("/opt/verify/bin/worker"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_unit_speaks_json_lines() {
        let script = r#"read line
case "$line" in *'"type":"start"'*) ;; *) exit 9 ;; esac
echo 'booting'
echo '{"type":"error","error":"boom"}'
exit 3"#;
        let launcher = ProcessLauncher::new("sh").with_args(["-c", script]);
        let mut handle = launcher.launch("run_1").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        handle
            .commands
            .send(UnitCommand::Start {
                config: run_config(dir.path(), None),
            })
            .unwrap();

        assert_eq!(
            handle.messages.recv().await,
            Some(UnitMessage::Error {
                error: "boom".to_string()
            })
        );
        assert_eq!(handle.messages.recv().await, None);
        assert_eq!(handle.exit.await.unwrap(), UnitExit::Code(3));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let launcher = ProcessLauncher::new("/nonexistent/verify-worker");
        let err = launcher.launch("run_1").await.err().unwrap();
        assert!(matches!(err, OrchestratorError::Launch { ref run_id, .. } if run_id == "run_1"));
    }

    #[tokio::test]
    async fn test_in_process_unit_runs_to_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let page = FakePage::new();
        let launcher = InProcessLauncher::new(capabilities(
            FakeLauncher::new(page.clone()),
            ScriptedModelFactory::default(),
        ));

        let mut handle = launcher.launch("run_1").await.unwrap();
        handle
            .commands
            .send(UnitCommand::Start {
                config: run_config(dir.path(), None),
            })
            .unwrap();

        let mut last = None;
        while let Some(message) = handle.messages.recv().await {
            last = Some(message);
        }
        assert!(matches!(
            last,
            Some(UnitMessage::Verdict {
                verdict: VerdictKind::Passed,
                ..
            })
        ));
        assert_eq!(handle.exit.await.unwrap(), UnitExit::Code(0));
        assert_eq!(page.closes(), 1);
    }
}
