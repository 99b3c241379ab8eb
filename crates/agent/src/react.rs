//! Observe, think, act, check: the model-driven verification loop.

use base64::Engine;
use browser::Page;
use protocol::{RunConfig, ScreenshotRef, VerdictKind};
use serde_json::Value;
use std::time::Instant;

use crate::action::{self, Action, ActionKind};
use crate::artifacts;
use crate::dispatch;
use crate::emitter::Emitter;
use crate::error::Result;
use crate::llm::{ChatMessage, ContentPart, LanguageModel};
use crate::prompt;
use crate::settings::LoopSettings;

const DEFAULT_SUMMARY: &str = "Verification complete";

pub struct ReactLoop<'a> {
    page: &'a dyn Page,
    model: &'a dyn LanguageModel,
    config: &'a RunConfig,
    emitter: &'a Emitter,
    settings: &'a LoopSettings,
    system_prompt: String,
    conversation: Vec<ChatMessage>,
}

impl<'a> ReactLoop<'a> {
    pub fn new(
        page: &'a dyn Page,
        model: &'a dyn LanguageModel,
        config: &'a RunConfig,
        emitter: &'a Emitter,
        settings: &'a LoopSettings,
    ) -> Self {
        Self {
            page,
            model,
            config,
            emitter,
            settings,
            system_prompt: prompt::system_prompt(&config.scenario),
            conversation: Vec::new(),
        }
    }

    /// Run until the model says `done`, its replies stop parsing, or the
    /// iteration cap is hit. Each of those emits exactly one verdict; an
    /// `Err` means no verdict was emitted.
    pub async fn run(mut self, started: Instant) -> Result<()> {
        tracing::info!(
            "[Agent] Starting agent loop with {} for \"{}\"",
            self.model.name(),
            self.config.scenario.title
        );

        for step_index in 0..self.settings.max_iterations {
            let shot = self.observe(step_index).await?;

            let action = match self.think().await? {
                Ok(action) => action,
                Err(reason) => {
                    self.emitter.verdict(
                        VerdictKind::Error,
                        format!("Agent stopped: model reply parse failure after retry ({})", reason),
                        None,
                        elapsed_ms(started),
                    );
                    return Ok(());
                }
            };

            self.emitter.think(
                step_index,
                &action.observation,
                &action.reasoning,
                action.kind.as_str(),
            );

            if action.kind == ActionKind::Done {
                self.finish(step_index, &action, shot, started);
                return Ok(());
            }

            let detail = self.act(&action).await;
            tokio::time::sleep(self.settings.action_settle).await;
            self.emitter
                .step(step_index, action.kind.as_str(), Some(detail), Some(shot));
        }

        tracing::warn!("[Agent] No verdict after {} iterations", self.settings.max_iterations);
        self.emitter.verdict(
            VerdictKind::Error,
            format!(
                "Agent stopped: iteration limit exceeded ({} steps without a verdict)",
                self.settings.max_iterations
            ),
            None,
            elapsed_ms(started),
        );
        Ok(())
    }

    /// Screenshot, save it, and show it to the model with the page's URL and title
    async fn observe(&mut self, step_index: u32) -> Result<ScreenshotRef> {
        let png = self.page.screenshot().await?;
        let url = self.page.url().await?;
        let title = self.page.title().await?;

        let shot = artifacts::save_screenshot(
            &self.config.artifacts_dir,
            artifacts::screenshot_filename(step_index, None),
            format!("{} ({})", title, url),
            &png,
        )
        .await?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        self.conversation.push(ChatMessage::user(vec![
            ContentPart::png(encoded),
            ContentPart::Text(prompt::observation(
                step_index,
                self.settings.max_iterations,
                &url,
                &title,
            )),
        ]));
        Ok(shot)
    }

    /// Ask for the next action, retrying once with a correction if the reply
    /// does not parse. The inner `Err` carries the final parse failure.
    async fn think(&mut self) -> Result<std::result::Result<Action, action::ParseError>> {
        let reply = self.ask().await?;
        match action::parse(&reply) {
            Ok(action) => return Ok(Ok(action)),
            Err(e) => tracing::warn!("[Agent] Unparseable model reply ({}); asking again", e),
        }

        self.conversation
            .push(ChatMessage::user_text(prompt::PARSE_CORRECTION));
        let reply = self.ask().await?;
        let parsed = action::parse(&reply);
        if let Err(e) = &parsed {
            tracing::warn!("[Agent] Model reply still unparseable after retry: {}", e);
        }
        Ok(parsed)
    }

    async fn ask(&mut self) -> Result<String> {
        let reply = self
            .model
            .chat(&self.conversation, &self.system_prompt)
            .await?;
        self.conversation.push(ChatMessage::assistant_text(reply.clone()));
        Ok(reply)
    }

    /// Execute; failures become a note to the model rather than an error
    async fn act(&mut self, action: &Action) -> String {
        match dispatch::execute(self.page, action, &self.config.base_url, self.settings).await {
            Ok(detail) => {
                tracing::debug!("[Agent] {}", detail);
                detail
            }
            Err(e) => {
                tracing::warn!("[Agent] Action {} failed: {}", action.kind, e);
                let message = e.to_string();
                self.conversation.push(ChatMessage::user_text(prompt::action_failed(
                    action.kind.as_str(),
                    &message,
                )));
                format!("Action failed: {}", message)
            }
        }
    }

    fn finish(&self, step_index: u32, action: &Action, shot: ScreenshotRef, started: Instant) {
        let verdict = match action.args.get("verdict") {
            None | Some(Value::Null) => VerdictKind::Passed,
            Some(Value::String(v)) if v == "passed" => VerdictKind::Passed,
            Some(_) => VerdictKind::Failed,
        };
        let summary = action
            .arg_str("summary")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SUMMARY)
            .to_string();

        tracing::info!("[Agent] Agent verdict: {} ({})", verdict, summary);

        self.emitter.step(
            step_index,
            ActionKind::Done.as_str(),
            Some(summary.clone()),
            Some(shot),
        );
        self.emitter.verdict(
            verdict,
            summary,
            Some(action.reasoning.clone()).filter(|r| !r.is_empty()),
            elapsed_ms(started),
        );
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::testing::{fast_settings, run_config, FakePage, ScriptedModel};
    use protocol::UnitMessage;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn reply(action: &str, args: Value) -> String {
        json!({
            "observation": format!("observed before {}", action),
            "reasoning": format!("{} next", action),
            "action": action,
            "actionArgs": args,
        })
        .to_string()
    }

    fn drain(rx: &mut UnboundedReceiver<UnitMessage>) -> Vec<UnitMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn verdicts(messages: &[UnitMessage]) -> Vec<(VerdictKind, String)> {
        messages
            .iter()
            .filter_map(|m| match m {
                UnitMessage::Verdict { verdict, summary, .. } => Some((*verdict, summary.clone())),
                _ => None,
            })
            .collect()
    }

    async fn run_loop(page: &FakePage, model: &ScriptedModel, settings: &LoopSettings) -> Vec<UnitMessage> {
        let dir = tempfile::tempdir().unwrap();
        let config = run_config(dir.path(), Some("anthropic"));
        let (emitter, mut rx) = Emitter::channel();

        ReactLoop::new(page, model, &config, &emitter, settings)
            .run(Instant::now())
            .await
            .unwrap();
        drain(&mut rx)
    }

    #[tokio::test]
    async fn test_click_then_done() {
        let page = FakePage::new().with_title("Pricing");
        let model = ScriptedModel::new([
            reply("click", json!({"selector": "#annual"})),
            reply("done", json!({"verdict": "passed", "summary": "Three plans are listed"})),
        ]);

        let messages = run_loop(&page, &model, &fast_settings()).await;

        assert_eq!(page.calls(), vec!["click #annual"]);
        assert_eq!(page.screenshots(), 2);

        let kinds: Vec<&str> = messages
            .iter()
            .map(|m| match m {
                UnitMessage::Think { .. } => "think",
                UnitMessage::Step { .. } => "step",
                UnitMessage::Verdict { .. } => "verdict",
                UnitMessage::Error { .. } => "error",
            })
            .collect();
        assert_eq!(kinds, vec!["think", "step", "think", "step", "verdict"]);

        match &messages[1] {
            UnitMessage::Step { step_index, action, detail, screenshot } => {
                assert_eq!(*step_index, 0);
                assert_eq!(action, "click");
                assert_eq!(detail.as_deref(), Some("Clicked #annual"));
                assert_eq!(screenshot.as_ref().unwrap().filename, "step-000.png");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &messages[3] {
            UnitMessage::Step { step_index, action, detail, screenshot } => {
                assert_eq!(*step_index, 1);
                assert_eq!(action, "done");
                assert_eq!(detail.as_deref(), Some("Three plans are listed"));
                assert_eq!(screenshot.as_ref().unwrap().filename, "step-001.png");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &messages[4] {
            UnitMessage::Verdict { verdict, summary, reasoning, .. } => {
                assert_eq!(*verdict, VerdictKind::Passed);
                assert_eq!(summary, "Three plans are listed");
                assert_eq!(reasoning.as_deref(), Some("done next"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conversation_carries_screenshots_and_replies() {
        let page = FakePage::new();
        let first = reply("scroll", json!({}));
        let model = ScriptedModel::new([first.clone(), reply("done", json!({}))]);

        run_loop(&page, &model, &fast_settings()).await;

        let transcripts = model.transcripts();
        assert_eq!(transcripts.len(), 2);
        assert_eq!(transcripts[0].len(), 1);
        assert!(transcripts[0][0].has_image());

        let second = &transcripts[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1], ChatMessage::assistant_text(first));
        assert!(second[2].text().starts_with("Step 2 of at most 20."));
        assert!(model.system_prompts()[0].contains("Scenario: Pricing page"));
    }

    #[tokio::test]
    async fn test_done_verdict_normalization() {
        for (args, expected, summary) in [
            (json!({}), VerdictKind::Passed, DEFAULT_SUMMARY),
            (json!({"verdict": "failed", "summary": "Broken"}), VerdictKind::Failed, "Broken"),
            (json!({"verdict": "maybe", "summary": ""}), VerdictKind::Failed, DEFAULT_SUMMARY),
            (json!({"verdict": true}), VerdictKind::Failed, DEFAULT_SUMMARY),
        ] {
            let page = FakePage::new();
            let model = ScriptedModel::new([reply("done", args.clone())]);
            let messages = run_loop(&page, &model, &fast_settings()).await;
            assert_eq!(
                verdicts(&messages),
                vec![(expected, summary.to_string())],
                "args: {}",
                args
            );
        }
    }

    #[tokio::test]
    async fn test_parse_retry_succeeds() {
        let page = FakePage::new();
        let model = ScriptedModel::new(["I think the page looks fine".to_string(), reply("done", json!({}))]);

        let messages = run_loop(&page, &model, &fast_settings()).await;

        assert_eq!(model.calls(), 2);
        let retry = &model.transcripts()[1];
        assert_eq!(retry.last().unwrap().text(), prompt::PARSE_CORRECTION);
        assert_eq!(retry.last().unwrap().role, Role::User);
        assert_eq!(verdicts(&messages)[0].0, VerdictKind::Passed);
    }

    #[tokio::test]
    async fn test_parse_failure_after_retry() {
        let page = FakePage::new();
        let model = ScriptedModel::new(["nope", "still nope", "never asked"]);

        let messages = run_loop(&page, &model, &fast_settings()).await;

        assert_eq!(model.calls(), 2);
        let corrections = model.transcripts()[1]
            .iter()
            .filter(|m| m.text() == prompt::PARSE_CORRECTION)
            .count();
        assert_eq!(corrections, 1);

        let verdicts = verdicts(&messages);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].0, VerdictKind::Error);
        assert!(verdicts[0].1.contains("parse failure after retry"));
        assert!(!messages.iter().any(|m| matches!(m, UnitMessage::Think { .. })));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let page = FakePage::new();
        let model = ScriptedModel::default().then_repeat(reply("wait", json!({"ms": 1})));
        let settings = LoopSettings {
            max_iterations: 3,
            ..fast_settings()
        };

        let messages = run_loop(&page, &model, &settings).await;

        assert_eq!(model.calls(), 3);
        let steps = messages
            .iter()
            .filter(|m| matches!(m, UnitMessage::Step { .. }))
            .count();
        assert_eq!(steps, 3);

        let verdicts = verdicts(&messages);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].0, VerdictKind::Error);
        assert!(verdicts[0].1.to_lowercase().contains("iteration limit exceeded"));
        assert!(messages.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_default_cap_is_twenty_steps() {
        assert_eq!(LoopSettings::default().max_iterations, 20);

        let page = FakePage::new();
        let model = ScriptedModel::default().then_repeat(reply("scroll", json!({"direction": "down"})));
        let settings = LoopSettings {
            action_settle: Duration::ZERO,
            ..LoopSettings::default()
        };

        let messages = run_loop(&page, &model, &settings).await;

        assert_eq!(model.calls(), 20);
        let (last, rest) = messages.split_last().unwrap();
        let step_indices: Vec<u32> = rest
            .iter()
            .filter_map(|m| match m {
                UnitMessage::Step { step_index, .. } => Some(*step_index),
                _ => None,
            })
            .collect();
        assert_eq!(step_indices, (0..20).collect::<Vec<_>>());
        match last {
            UnitMessage::Verdict { verdict, summary, .. } => {
                assert_eq!(*verdict, VerdictKind::Error);
                assert!(summary.contains("20 steps without a verdict"));
            }
            other => panic!("expected verdict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_action_is_fed_back() {
        let page = FakePage::new()
            .without_selector("#missing")
            .without_text("#missing");
        let model = ScriptedModel::new([
            reply("click", json!({"selector": "#missing"})),
            reply("done", json!({"verdict": "failed", "summary": "Button absent"})),
        ]);

        let messages = run_loop(&page, &model, &fast_settings()).await;

        match &messages[1] {
            UnitMessage::Step { detail, .. } => {
                assert!(detail.as_deref().unwrap().starts_with("Action failed:"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let second = &model.transcripts()[1];
        assert!(second
            .iter()
            .any(|m| m.text().starts_with("The click action failed:")));
        assert_eq!(verdicts(&messages), vec![(VerdictKind::Failed, "Button absent".to_string())]);
    }

    #[tokio::test]
    async fn test_unsupported_action_continues() {
        let page = FakePage::new();
        let model = ScriptedModel::new([reply("hover", json!({"selector": "a"})), reply("done", json!({}))]);

        let messages = run_loop(&page, &model, &fast_settings()).await;

        match &messages[1] {
            UnitMessage::Step { action, detail, .. } => {
                assert_eq!(action, "hover");
                assert_eq!(detail.as_deref(), Some("Action failed: unsupported action 'hover'"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(verdicts(&messages)[0].0, VerdictKind::Passed);
    }

    #[tokio::test]
    async fn test_model_error_is_fatal() {
        let page = FakePage::new();
        let model = ScriptedModel::default();
        let dir = tempfile::tempdir().unwrap();
        let config = run_config(dir.path(), Some("openai"));
        let (emitter, mut rx) = Emitter::channel();

        let result = ReactLoop::new(&page, &model, &config, &emitter, &fast_settings())
            .run(Instant::now())
            .await;

        assert!(matches!(result, Err(crate::UnitError::Model(_))));
        assert!(verdicts(&drain(&mut rx)).is_empty());
    }
}
