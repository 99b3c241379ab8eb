//! Dialog Watchdog - Closes JavaScript dialogs as soon as they open
//!
//! An open `alert`/`confirm`/`prompt` blocks the renderer, so every
//! evaluation would hang until the command timeout. Dialogs are dismissed;
//! `beforeunload` is accepted so navigation can proceed.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::cdp::CDPClient;
use crate::error::Result;
use crate::events::BrowserEvent;
use crate::watchdog::Watchdog;

#[derive(Default)]
pub struct DialogWatchdog {
    handled: Arc<AtomicU64>,
}

impl DialogWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dialogs closed so far
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Watchdog for DialogWatchdog {
    fn name(&self) -> &str {
        "DialogWatchdog"
    }

    async fn on_event(&self, event: &BrowserEvent) {
        if let BrowserEvent::Closed = event {
            if self.handled() > 0 {
                tracing::debug!("[DialogWatchdog] Closed {} dialogs", self.handled());
            }
        }
    }

    async fn on_attach(&self, cdp_client: Arc<CDPClient>) -> Result<()> {
        // Weak: the client owns this callback
        let client: Weak<CDPClient> = Arc::downgrade(&cdp_client);
        let handled = self.handled.clone();
        cdp_client.subscribe(
            "Page.javascriptDialogOpening",
            Arc::new(move |event| {
                let Some(client) = client.upgrade() else {
                    return;
                };
                let params = event.params.unwrap_or_default();
                let kind = params["type"].as_str().unwrap_or("alert").to_string();
                let message = params["message"].as_str().unwrap_or_default().to_string();
                let session_id = event.session_id;
                let handled = handled.clone();

                tokio::spawn(async move {
                    tracing::info!("[DialogWatchdog] Closing {} dialog: {:?}", kind, message);
                    let accept = kind == "beforeunload";
                    match client
                        .send_request(
                            "Page.handleJavaScriptDialog",
                            Some(json!({ "accept": accept })),
                            session_id,
                        )
                        .await
                    {
                        Ok(_) => {
                            handled.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => tracing::warn!("[DialogWatchdog] Could not close dialog: {}", e),
                    }
                });
            }),
        );

        tracing::debug!("[DialogWatchdog] Attached to CDP events");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::fake::fake_devtools;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dialog_is_dismissed_in_its_session() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let url = fake_devtools(move |id, method| {
            let _ = seen_tx.send(method.to_string());
            match method {
                "Runtime.evaluate" => Some(vec![
                    json!({
                        "method": "Page.javascriptDialogOpening",
                        "sessionId": "S1",
                        "params": { "type": "alert", "message": "Saved!" }
                    }),
                    json!({ "id": id, "result": { "result": { "type": "undefined" } } }),
                ]),
                _ => Some(vec![json!({ "id": id, "result": {} })]),
            }
        })
        .await;
        let client = CDPClient::connect(&url).await.unwrap();
        let watchdog = DialogWatchdog::new();
        watchdog.on_attach(client.clone()).await.unwrap();

        client
            .send_request("Runtime.evaluate", None, Some("S1".to_string()))
            .await
            .unwrap();

        let handled = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(method) = seen_rx.recv().await {
                if method == "Page.handleJavaScriptDialog" {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(handled);

        tokio::time::timeout(Duration::from_secs(5), async {
            while watchdog.handled() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(watchdog.handled(), 1);
    }
}
