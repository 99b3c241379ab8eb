//! CDP client over one WebSocket
//!
//! Commands are matched to replies by id. Events go to persistent
//! subscribers and to one-shot waiters registered with
//! [`CDPClient::expect_event`]. Every command is bounded by a timeout; there
//! is no retry and no queueing behind a dead socket.

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{CDPEvent, CDPMessage, CDPRequest, CDPResponse, RequestId, SessionId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request {0} timed out")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CDPError>;

pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// Where incoming frames are delivered
#[derive(Default)]
struct Routes {
    replies: DashMap<RequestId, oneshot::Sender<CDPResponse>>,
    subscribers: DashMap<String, Vec<EventCallback>>,
    waiters: DashMap<String, Vec<oneshot::Sender<CDPEvent>>>,
}

impl Routes {
    fn deliver(&self, message: CDPMessage) {
        match message {
            CDPMessage::Response(response) => match self.replies.remove(&response.id) {
                // The caller may already have timed out
                Some((_, reply)) => {
                    let _ = reply.send(response);
                }
                None => tracing::debug!("[CDPClient] Reply for unknown request {}", response.id),
            },
            CDPMessage::Event(event) => {
                if let Some((_, waiters)) = self.waiters.remove(&event.method) {
                    for waiter in waiters {
                        let _ = waiter.send(event.clone());
                    }
                }
                let callbacks = self
                    .subscribers
                    .get(&event.method)
                    .map(|subs| subs.value().clone())
                    .unwrap_or_default();
                for callback in callbacks {
                    callback(event.clone());
                }
            }
        }
    }

    /// Dropping the senders wakes every caller with `Closed`
    fn hang_up(&self) {
        self.replies.clear();
        self.waiters.clear();
    }
}

pub struct CDPClient {
    next_id: AtomicU64,
    routes: Arc<Routes>,
    writer: Mutex<SplitSink<Socket, Message>>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl CDPClient {
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with_timeout(ws_url, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect with a custom per-command timeout
    pub async fn connect_with_timeout(ws_url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let (socket, _) = connect_async(ws_url).await?;
        let (writer, reader) = socket.split();

        let routes = Arc::new(Routes::default());
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_loop(reader, routes.clone(), closed.clone()));
        tracing::debug!("[CDPClient] Connected to {}", ws_url);

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            routes,
            writer: Mutex::new(writer),
            closed,
            request_timeout,
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a command and wait for its result
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CDPError::Closed);
        }

        let method = method.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_string(&CDPRequest {
            id,
            method: method.clone(),
            params,
            session_id,
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.routes.replies.insert(id, reply_tx);

        let sent = self.writer.lock().await.send(Message::Text(frame)).await;
        if let Err(e) = sent {
            self.routes.replies.remove(&id);
            return Err(e.into());
        }

        let response = match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CDPError::Closed),
            Err(_) => {
                self.routes.replies.remove(&id);
                return Err(CDPError::Timeout(method));
            }
        };

        match response.error {
            Some(error) => Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Call `callback` for every future event named `method`
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        self.routes
            .subscribers
            .entry(method.into())
            .or_default()
            .push(callback);
    }

    /// Resolve on the next event named `method`.
    ///
    /// Register before sending the command that triggers the event, otherwise
    /// a fast browser can fire it before anyone is listening.
    pub fn expect_event(&self, method: impl Into<String>) -> oneshot::Receiver<CDPEvent> {
        let (tx, rx) = oneshot::channel();
        self.routes.waiters.entry(method.into()).or_default().push(tx);
        rx
    }

    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.writer.lock().await.close().await?;
        Ok(())
    }
}

async fn read_loop(mut reader: SplitStream<Socket>, routes: Arc<Routes>, closed: Arc<AtomicBool>) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<CDPMessage>(&text) {
                Ok(message) => routes.deliver(message),
                Err(e) => tracing::error!("[CDPClient] Undecodable frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                tracing::debug!("[CDPClient] Browser closed the socket");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[CDPClient] Socket error: {}", e);
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    routes.hang_up();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::fake::fake_devtools;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_replies_and_events_are_routed() {
        let url = fake_devtools(|id, method| match method {
            "Page.reload" => Some(vec![
                json!({ "method": "Page.loadEventFired", "params": { "timestamp": 1.5 } }),
                json!({ "id": id, "result": {} }),
            ]),
            _ => Some(vec![json!({ "id": id, "result": { "product": "Chrome/120" } })]),
        })
        .await;
        let client = CDPClient::connect(&url).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        client.subscribe(
            "Page.loadEventFired",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let loaded = client.expect_event("Page.loadEventFired");

        let version = client.send_request("Browser.getVersion", None, None).await.unwrap();
        assert_eq!(version["product"], "Chrome/120");

        client
            .send_request("Page.reload", None, Some("S1".to_string()))
            .await
            .unwrap();
        let event = loaded.await.unwrap();
        assert_eq!(event.params.unwrap()["timestamp"], 1.5);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors_surface() {
        let url = fake_devtools(|id, _| {
            Some(vec![json!({ "id": id, "error": { "code": -32601, "message": "'Nope.nope' wasn't found" } })])
        })
        .await;
        let client = CDPClient::connect(&url).await.unwrap();

        let err = client.send_request("Nope.nope", None, None).await.unwrap_err();
        assert!(matches!(err, CDPError::Protocol { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_unanswered_command_times_out() {
        let url = fake_devtools(|_, _| None).await;
        let client = CDPClient::connect_with_timeout(&url, Duration::from_millis(50))
            .await
            .unwrap();

        let err = client.send_request("Page.enable", None, None).await.unwrap_err();
        assert!(matches!(err, CDPError::Timeout(ref m) if m == "Page.enable"));
    }

    #[tokio::test]
    async fn test_hang_up_fails_pending_and_later_commands() {
        let url = fake_devtools(|_, _| None).await;
        let client = CDPClient::connect(&url).await.unwrap();
        let never = client.expect_event("Page.loadEventFired");

        let err = client.send_request("Test.hangUp", None, None).await.unwrap_err();
        assert!(matches!(err, CDPError::Closed));
        assert!(never.await.is_err());
        assert!(client.is_closed());
        assert!(matches!(
            client.send_request("Page.enable", None, None).await,
            Err(CDPError::Closed)
        ));
    }

    #[tokio::test]
    #[ignore = "needs a browser listening on port 9222"]
    async fn test_connect_to_real_browser() {
        let client = CDPClient::connect("ws://localhost:9222/devtools/browser")
            .await
            .unwrap();
        let version = client.send_request("Browser.getVersion", None, None).await.unwrap();
        assert!(version["product"].is_string());
        client.close().await.unwrap();
    }
}
