//! Execution unit as a child process.
//!
//! Reads newline-delimited JSON commands on stdin and writes one JSON
//! message per line on stdout. Logs go to stderr so stdout stays clean.

use agent::{serve, Capabilities, Emitter};
use protocol::UnitCommand;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (emitter, mut messages) = Emitter::channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<UnitCommand>(&line) {
                        Ok(command) => {
                            if command_tx.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("[Worker] Ignoring undecodable command: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("[Worker] Reading stdin failed: {}", e);
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = messages.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("[Worker] Could not encode message: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                tracing::error!("[Worker] Writing stdout failed: {}", e);
                break;
            }
            if let Err(e) = stdout.flush().await {
                tracing::error!("[Worker] Flushing stdout failed: {}", e);
                break;
            }
        }
    });

    serve(command_rx, &Capabilities::from_env(), emitter).await;

    if let Err(e) = writer.await {
        tracing::error!("[Worker] Output task failed: {}", e);
    }
    // The stdin reader blocks on a read that cannot be cancelled
    std::process::exit(0);
}
