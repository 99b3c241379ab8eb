//! Unit entrypoint: one start command in, one verdict out.

use browser::{BrowserKind, BrowserLauncher, ChromeLauncher, LaunchOptions, Page};
use futures_util::FutureExt;
use protocol::{RunConfig, UnitCommand, VerdictKind};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::emitter::Emitter;
use crate::error::Result;
use crate::fallback;
use crate::llm::{HttpModelFactory, ModelFactory, ModelSettings};
use crate::react::{elapsed_ms, ReactLoop};
use crate::settings::LoopSettings;

/// What a unit needs from the outside world
#[derive(Clone)]
pub struct Capabilities {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub models: Arc<dyn ModelFactory>,
    pub settings: LoopSettings,
}

impl Capabilities {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        models: Arc<dyn ModelFactory>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            launcher,
            models,
            settings,
        }
    }

    /// Real browser and HTTP providers, configured from the environment
    pub fn from_env() -> Self {
        Self::new(
            Arc::new(ChromeLauncher::default()),
            Arc::new(HttpModelFactory::new(ModelSettings::from_env())),
            LoopSettings::default(),
        )
    }
}

/// Wait for the first start command and run it. Other commands are ignored.
pub async fn serve(
    mut commands: mpsc::UnboundedReceiver<UnitCommand>,
    capabilities: &Capabilities,
    emitter: Emitter,
) {
    while let Some(command) = commands.recv().await {
        match command {
            UnitCommand::Start { config } => {
                run_unit(config, capabilities, &emitter).await;
                return;
            }
            UnitCommand::Unknown => tracing::debug!("[Unit] Ignoring unrecognized command"),
        }
    }
    tracing::warn!("[Unit] Command channel closed before a start command arrived");
}

/// Execute one run. Always emits exactly one verdict and always releases
/// the browser session, whatever happens inside.
pub async fn run_unit(config: RunConfig, capabilities: &Capabilities, emitter: &Emitter) {
    let span = tracing::info_span!("run", run_id = %config.run_id);
    async {
        let started = Instant::now();
        let mut session: Option<Box<dyn Page>> = None;

        let outcome = AssertUnwindSafe(drive(&config, capabilities, emitter, started, &mut session))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(message) = failure {
            tracing::error!("[Unit] Run failed: {}", message);
            emitter.error(message.clone());
            emitter.verdict(
                VerdictKind::Error,
                format!("Worker failed: {}", message),
                None,
                elapsed_ms(started),
            );
        }

        if let Some(page) = session.take() {
            if let Err(e) = page.close().await {
                tracing::warn!("[Unit] Closing browser failed (ignored): {}", e);
            }
        }
    }
    .instrument(span)
    .await
}

async fn drive(
    config: &RunConfig,
    capabilities: &Capabilities,
    emitter: &Emitter,
    started: Instant,
    session: &mut Option<Box<dyn Page>>,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.artifacts_dir).await?;

    // Resolve the model before launching so a bad provider costs no browser
    let model = match config.model_credentials() {
        Some((provider, api_key)) => Some(capabilities.models.create(
            provider,
            api_key,
            config.llm_model.as_deref(),
        )?),
        None => None,
    };

    let viewport = config.viewport.unwrap_or_default();
    let options = LaunchOptions {
        kind: BrowserKind::from_name(&config.browser),
        width: viewport.width,
        height: viewport.height,
    };
    tracing::info!(
        "[Unit] Opening {} at {}x{}",
        options.kind,
        options.width,
        options.height
    );
    let page: &dyn Page = &**session.insert(capabilities.launcher.launch(&options).await?);

    let settings = &capabilities.settings;
    let start_url = config.start_url();
    tracing::info!("[Unit] Navigating to {}", start_url);
    page.goto(&start_url, settings.navigation_timeout).await?;
    if let Err(e) = page.wait_for_network_idle(settings.network_idle_timeout).await {
        tracing::debug!("[Unit] Network did not settle, continuing: {}", e);
    }

    match model {
        Some(model) => {
            ReactLoop::new(page, model.as_ref(), config, emitter, settings)
                .run(started)
                .await
        }
        None => fallback::run(page, config, emitter, settings, started).await,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with a non-string payload".to_string()
    }
}
