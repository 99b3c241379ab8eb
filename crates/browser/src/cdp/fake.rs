//! Loopback DevTools endpoint for tests

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Accept one connection and answer each command with `reply(id, method)`.
/// `None` leaves the command unanswered; `Test.hangUp` closes the socket.
pub(crate) async fn fake_devtools<F>(reply: F) -> String
where
    F: Fn(u64, &str) -> Option<Vec<Value>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let request: Value = serde_json::from_str(&text).unwrap();
            let id = request["id"].as_u64().unwrap();
            let method = request["method"].as_str().unwrap().to_string();
            if method == "Test.hangUp" {
                let _ = ws.close(None).await;
                return;
            }
            for frame in reply(id, &method).unwrap_or_default() {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
        }
    });
    format!("ws://{}", addr)
}
