//! Stdio transport
//!
//! Newline-delimited JSON-RPC on stdin/stdout. Requests are handled in their
//! own tasks so a slow OCR call never blocks the read loop, which must stay
//! free to deliver the client's answers to our sampling requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

use super::handlers::Handlers;
use super::peer::ClientPeer;
use super::protocol::{error_codes, IncomingMessage, JsonRpcResponse};

/// How long in-flight responses get to drain after stdin closes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct McpServer {
    state: AppState,
}

impl McpServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve on the process's stdin and stdout
    pub async fn run(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one session until `input` reaches EOF
    pub async fn serve<R, W>(&self, input: R, output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(write_lines(rx, output));

        let peer = Arc::new(ClientPeer::new(tx));
        let handlers = Arc::new(Handlers::new(self.state.clone(), peer.clone()));

        let mut reader = BufReader::new(input);
        let mut line = String::new();

        info!("Server ready, waiting for requests");

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await.map_err(|e| {
                error!("Failed to read from stdin: {}", e);
                anyhow::anyhow!("stdin read error: {}", e)
            })?;

            if bytes_read == 0 {
                info!("stdin closed (EOF), shutting down...");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("Received: {}", trimmed);

            match IncomingMessage::parse(trimmed) {
                Ok(IncomingMessage::Request(request)) => {
                    if request.jsonrpc != "2.0" {
                        peer.send(&JsonRpcResponse::error(
                            request.id,
                            error_codes::INVALID_REQUEST,
                            "Invalid JSON-RPC version",
                        ))?;
                        continue;
                    }

                    let handlers = handlers.clone();
                    let peer = peer.clone();
                    tokio::spawn(async move {
                        if let Some(response) = handlers.dispatch(request).await {
                            if let Err(e) = peer.send(&response) {
                                warn!("Dropping response: {}", e);
                            }
                        }
                    });
                }
                Ok(IncomingMessage::Response(response)) => {
                    if !peer.complete(response) {
                        debug!("Response for unknown request ignored");
                    }
                }
                Err(e) => {
                    warn!("Failed to parse request: {}", e);
                    peer.send(&JsonRpcResponse::error(
                        None,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))?;
                }
            }
        }

        // The writer ends once every sender is gone: ours here, the rest with
        // the request tasks still running.
        peer.fail_pending();
        drop(handlers);
        drop(peer);
        match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => error!("Writer task panicked: {}", e),
            Err(_) => warn!("Responses still pending after {:?}, exiting", DRAIN_TIMEOUT),
        }

        info!("Server run loop exiting");
        Ok(())
    }
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<String>, output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(output);
    while let Some(line) = rx.recv().await {
        debug!("Sending: {}", line);
        writer.write_all(line.as_bytes()).await.map_err(|e| {
            error!("Failed to write to stdout: {}", e);
            anyhow::anyhow!("stdout write error: {}", e)
        })?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
