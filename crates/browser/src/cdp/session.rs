//! Commands scoped to one attached target
//!
//! A [`CDPSession`] is only a session id plus the shared client; every
//! target rides the browser's single WebSocket.

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use super::client::{CDPClient, Result};
use super::protocol::{
    AttachToTargetResult, EvaluateResult, NavigateResult, ScreenshotResult, SessionId, TargetId,
};

/// Domains a verification page needs
pub const PAGE_DOMAINS: &[&str] = &["Page", "Runtime", "Network", "Inspector"];

#[derive(Clone)]
pub struct CDPSession {
    client: Arc<CDPClient>,
    pub target_id: TargetId,
    pub session_id: SessionId,
}

impl CDPSession {
    /// Attach with a flat session and enable `domains`. A domain that fails
    /// to enable is logged, not fatal.
    pub async fn attach(client: Arc<CDPClient>, target_id: TargetId, domains: &[&str]) -> Result<Self> {
        let attached: AttachToTargetResult = decode(
            client
                .send_request(
                    "Target.attachToTarget",
                    Some(json!({ "targetId": &target_id, "flatten": true })),
                    None,
                )
                .await?,
        )?;
        let session = Self {
            client,
            target_id,
            session_id: attached.session_id,
        };

        let enabled = join_all(
            domains
                .iter()
                .map(|domain| session.send(format!("{}.enable", domain), None)),
        )
        .await;
        for (domain, result) in domains.iter().zip(enabled) {
            if let Err(e) = result {
                tracing::warn!("[CDPSession] {}.enable failed: {}", domain, e);
            }
        }

        Ok(session)
    }

    /// Send a command within this target's session
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Start a navigation. Returns once the browser has committed or rejected it.
    pub async fn navigate(&self, url: impl Into<String>) -> Result<NavigateResult> {
        decode(self.send("Page.navigate", Some(json!({ "url": url.into() }))).await?)
    }

    /// Evaluate JavaScript, awaiting promises and returning the value by copy
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<EvaluateResult> {
        let params = json!({
            "expression": expression.into(),
            "returnByValue": true,
            "awaitPromise": true,
        });
        decode(self.send("Runtime.evaluate", Some(params)).await?)
    }

    /// Visible viewport as base64 PNG
    pub async fn capture_screenshot(&self) -> Result<String> {
        let params = json!({ "format": "png", "captureBeyondViewport": false });
        let shot: ScreenshotResult = decode(self.send("Page.captureScreenshot", Some(params)).await?)?;
        Ok(shot.data)
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        let params = json!({
            "width": width,
            "height": height,
            "deviceScaleFactor": 1,
            "mobile": false,
        });
        self.send("Emulation.setDeviceMetricsOverride", Some(params)).await?;
        Ok(())
    }

    /// Move, press and release the left button at viewport coordinates
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.mouse(json!({ "type": "mouseMoved", "x": x, "y": y })).await?;
        for phase in ["mousePressed", "mouseReleased"] {
            self.mouse(json!({
                "type": phase,
                "x": x,
                "y": y,
                "button": "left",
                "clickCount": 1,
            }))
            .await?;
        }
        Ok(())
    }

    /// Type into whatever has focus
    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send("Input.insertText", Some(json!({ "text": text }))).await?;
        Ok(())
    }

    async fn mouse(&self, params: Value) -> Result<()> {
        self.send("Input.dispatchMouseEvent", Some(params)).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
