//! RPC transport to a plugin process.
//!
//! [`RpcTransport`] is the seam between the RPC client and the byte
//! stream. [`StdioTransport`] speaks newline-delimited JSON-RPC over a
//! pair of pipes (normally the plugin's stdin/stdout), multiplexing
//! concurrent requests by request ID.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use capreg_plugin::protocol::{JsonRpcRequest, JsonRpcResponse};
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{RegistryError, Result};

/// Transport layer for JSON-RPC communication with a plugin.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a JSON-RPC request and return the response.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Whether the connection is known to be closed.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Pending response registry: maps request IDs to oneshot senders.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Removes a request's pending entry when its caller goes away, including
/// when the request future is dropped mid-flight.
struct PendingGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Transport over a pair of newline-delimited JSON pipes.
///
/// Requests are framed into whole lines and queued to a writer task, so
/// a caller abandoning a request never leaves a partial line on the
/// plugin's input. A reader task hands each response line to the request
/// waiting on its ID. When either side of the connection fails every
/// pending request fails and the transport reports itself closed.
pub struct StdioTransport {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl StdioTransport {
    /// Start a transport that writes requests to `writer` and reads
    /// responses from `reader`.
    ///
    /// `reader` may already have been advanced past the handshake line.
    pub fn new<R, W>(writer: W, reader: R, request_timeout: Duration) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let writer_pending = Arc::clone(&pending);
        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = outbound_rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(error = %e, "rpc writer: write failed, closing connection");
                    writer_closed.store(true, Ordering::SeqCst);
                    writer_pending.lock().clear();
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader_handle = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(None) => {
                        debug!("rpc reader: plugin closed its output");
                        break;
                    }
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(response) => {
                                let id = response.id;
                                let waiter = reader_pending.lock().remove(&id);
                                match waiter {
                                    Some(tx) => {
                                        let _ = tx.send(response);
                                    }
                                    None => debug!(id, "rpc reader: response for abandoned request"),
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "rpc reader: ignoring non-response line");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "rpc reader: read error, exiting");
                        break;
                    }
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every waiting request.
            reader_pending.lock().clear();
        });

        Self {
            outbound,
            pending,
            closed,
            request_timeout,
            reader_handle,
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

#[async_trait]
impl RpcTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if self.is_closed() {
            return Err(RegistryError::RpcTransport(
                "plugin connection is closed".into(),
            ));
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let id = request.id;
        debug!(method = %request.method, id, "sending rpc request");

        let (tx, rx) = oneshot::channel::<JsonRpcResponse>();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        if self.outbound.send(line).is_err() {
            self.closed.store(true, Ordering::SeqCst);
            return Err(RegistryError::RpcTransport(
                "plugin connection is closed".into(),
            ));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RegistryError::RpcTransport(
                "plugin connection closed before responding".into(),
            )),
            Err(_) => Err(RegistryError::RpcTransport(format!(
                "request {id} timed out after {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A mock transport for testing.
///
/// Returns pre-programmed responses in order and records every request.
#[cfg(test)]
pub struct MockTransport {
    responses: Mutex<Vec<JsonRpcResponse>>,
    requests: Mutex<Vec<JsonRpcRequest>>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a mock transport with pre-programmed responses.
    pub fn new(responses: Vec<JsonRpcResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// All requests sent through this transport.
    pub async fn requests(&self) -> Vec<JsonRpcRequest> {
        self.requests.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl RpcTransport for MockTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        self.requests.lock().push(request);
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            Err(RegistryError::RpcTransport("no more mock responses".into()))
        } else {
            Ok(responses.remove(0))
        }
    }
}
