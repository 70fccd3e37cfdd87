//! Stdio transport: reads JSON-RPC from stdin, writes to stdout.
//!
//! Requests run as their own tasks so a long crawl does not block the
//! reader. That is what lets `notifications/cancelled` reach a request
//! that is still running. Responses funnel through a single writer task,
//! so lines never interleave.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::ProtocolHandler;
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::framing;

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    handler: ProtocolHandler,
}

impl StdioTransport {
    pub fn new(handler: ProtocolHandler) -> Self {
        Self { handler }
    }

    /// Run the transport loop over the process stdin and stdout.
    pub async fn run(&self) -> McpResult<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Serve newline-delimited JSON-RPC until the reader hits EOF.
    ///
    /// On EOF every in-flight request is cancelled and awaited, so each one
    /// still gets its response written before this returns.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_loop(writer, rx));

        let mut lines = reader.lines();
        let mut requests = JoinSet::new();

        tracing::info!("Stdio transport started");

        loop {
            while let Some(joined) = requests.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Request task failed: {e}");
                }
            }

            let Some(line) = lines.next_line().await.map_err(McpError::Io)? else {
                tracing::info!("EOF on stdin, shutting down");
                break;
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match framing::parse_message(trimmed) {
                Ok(msg @ JsonRpcMessage::Request(_)) => {
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    requests.spawn(async move {
                        if let Some(response) = handler.handle_message(msg).await {
                            send(&tx, &response);
                        }
                    });
                }
                Ok(msg) => {
                    if let Some(response) = self.handler.handle_message(msg).await {
                        send(&tx, &response);
                    }
                }
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    let response = framing::parse_error_response(&e)?;
                    send(&tx, &response);
                }
            }
        }

        self.handler.cancel_all().await;
        while let Some(joined) = requests.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Request task failed: {e}");
            }
        }

        drop(tx);
        writer_task
            .await
            .map_err(|e| McpError::InternalError(format!("Writer task failed: {e}")))?
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, value: &serde_json::Value) {
    match framing::frame_message(value) {
        Ok(framed) => {
            if tx.send(framed).is_err() {
                tracing::warn!("Writer closed; dropping response");
            }
        }
        Err(e) => tracing::error!("Failed to frame response: {e}"),
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(framed) = rx.recv().await {
        writer
            .write_all(framed.as_bytes())
            .await
            .map_err(McpError::Io)?;
        writer.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}
