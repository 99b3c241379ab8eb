//! Screenshot-only verification, used when no model is configured.
//!
//! Captures the page at five fixed scroll positions and passes the run;
//! judging the screenshots is left to whoever reads them.

use browser::Page;
use protocol::{RunConfig, VerdictKind};
use std::time::Instant;

use crate::artifacts;
use crate::emitter::Emitter;
use crate::error::Result;
use crate::react::elapsed_ms;
use crate::settings::LoopSettings;

struct Position {
    action: &'static str,
    caption: &'static str,
    /// `None` leaves the page where it loaded
    scroll: Option<f64>,
}

const POSITIONS: [Position; 5] = [
    Position {
        action: "initial-load",
        caption: "Initial page load",
        scroll: None,
    },
    Position {
        action: "scroll-30",
        caption: "Scrolled down 30%",
        scroll: Some(0.3),
    },
    Position {
        action: "scroll-60",
        caption: "Scrolled down 60%",
        scroll: Some(0.6),
    },
    Position {
        action: "scroll-bottom",
        caption: "Scrolled to bottom",
        scroll: Some(1.0),
    },
    Position {
        action: "scroll-top",
        caption: "Scrolled back to top",
        scroll: Some(0.0),
    },
];

pub async fn run(
    page: &dyn Page,
    config: &RunConfig,
    emitter: &Emitter,
    settings: &LoopSettings,
    started: Instant,
) -> Result<()> {
    tracing::info!("[Fallback] No model configured; capturing screenshots only");

    let mut captions = Vec::with_capacity(POSITIONS.len());
    for (step_index, position) in (0u32..).zip(POSITIONS.iter()) {
        if let Some(ratio) = position.scroll {
            page.scroll_to_ratio(ratio).await?;
        }
        tokio::time::sleep(settings.capture_settle).await;

        let png = page.screenshot().await?;
        let shot = artifacts::save_screenshot(
            &config.artifacts_dir,
            artifacts::screenshot_filename(step_index, Some(position.action)),
            position.caption,
            &png,
        )
        .await?;

        emitter.step(step_index, position.action, None, Some(shot));
        captions.push(format!("Step {}: {}", step_index, position.caption));
    }

    let summary = format!(
        "Captured {} screenshots of \"{}\" at {}. {}.",
        captions.len(),
        config.scenario.title,
        config.start_url(),
        captions.join("; ")
    );
    emitter.verdict(
        VerdictKind::Passed,
        summary,
        Some(
            "Screenshot-only verification: no language model was configured, so the page was \
             captured at fixed scroll positions without automated assessment."
                .to_string(),
        ),
        elapsed_ms(started),
    );
    Ok(())
}
