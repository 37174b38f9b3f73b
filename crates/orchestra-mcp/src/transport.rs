//! Backend transport layer
//!
//! `BackendConnection` is the seam between sessions and the wire: the
//! production implementation spawns a child process and speaks
//! line-delimited JSON-RPC over its stdio pipes, tests substitute mocks.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use orchestra_types::errors::{GatewayError, GatewayResult};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// A connection to a single backend server
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Send a request and wait for its matching response
    async fn send_request(&self, request: JsonRpcRequest) -> GatewayResult<JsonRpcResponse>;

    /// Send a notification (no response expected)
    async fn send_notification(&self, notification: JsonRpcNotification) -> GatewayResult<()>;

    /// Tear the connection down and release the backend
    async fn close(&self) -> GatewayResult<()>;
}

type PendingMap = Arc<DashMap<String, oneshot::Sender<JsonRpcResponse>>>;

/// Stdio transport to a spawned child process
///
/// Writes newline-delimited JSON-RPC to the child's stdin and correlates
/// responses read off its stdout with pending requests by id. The child's
/// stderr is inherited so backend diagnostics land on the gateway's stderr.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    child: Mutex<Child>,
    reader_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn `program args...` with the given extra environment and attach
    /// to its stdio pipes
    pub fn spawn(
        program: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> GatewayResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::Transport("failed to capture child stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::Transport("failed to capture child stdout".to_string()))?;

        let pending: PendingMap = Arc::new(DashMap::new());
        let reader_pending = Arc::clone(&pending);

        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(line) {
                            Ok(response) if !response.id.is_null() => {
                                let key = response.id.to_string();
                                if let Some((_, tx)) = reader_pending.remove(&key) {
                                    let _ = tx.send(response);
                                } else {
                                    tracing::warn!(id = %key, "response with no pending request");
                                }
                            }
                            _ => {
                                // Server-initiated notifications are not
                                // forwarded upstream
                                tracing::trace!(line, "ignoring non-response message from backend");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(%error, "error reading backend stdout");
                        break;
                    }
                }
            }
            // Dropping the senders wakes every waiter with a closed channel
            reader_pending.clear();
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            child: Mutex::new(child),
            reader_handle: parking_lot::Mutex::new(Some(reader_handle)),
        })
    }

    async fn write_line(&self, payload: &Value) -> GatewayResult<()> {
        let mut stdin = self.stdin.lock().await;
        let line = serde_json::to_string(payload)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl BackendConnection for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> GatewayResult<JsonRpcResponse> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| GatewayError::Transport("request without id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        // Register before writing so a fast response cannot race the insert
        self.pending.insert(id.to_string(), tx);

        let payload = serde_json::to_value(&request)?;
        if let Err(error) = self.write_line(&payload).await {
            self.pending.remove(&id.to_string());
            return Err(error);
        }

        rx.await.map_err(|_| {
            GatewayError::Transport("connection closed before response".to_string())
        })
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> GatewayResult<()> {
        let payload = serde_json::to_value(&notification)?;
        self.write_line(&payload).await
    }

    async fn close(&self) -> GatewayResult<()> {
        if let Some(handle) = self.reader_handle.lock().take() {
            handle.abort();
        }
        self.pending.clear();

        let mut child = self.child.lock().await;
        child.kill().await?;
        Ok(())
    }
}
