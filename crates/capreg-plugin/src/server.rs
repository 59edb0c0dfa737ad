//! Plugin-side server for newline-delimited JSON-RPC.
//!
//! [`PluginServer`] is generic over `AsyncBufRead + AsyncWrite` so it can
//! be driven by stdio in a real plugin process or by in-memory pipes in
//! tests. It writes the [`HandshakeAnnouncement`] first, then answers
//! `resource/fetch` and `resource/push` requests until EOF.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::protocol::{
    FetchParams, FetchResult, HandshakeAnnouncement, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, METHOD_FETCH, METHOD_PUSH, PushParams, PushResult, error_codes,
};
use crate::traits::ResourceRepository;

/// Serves a [`ResourceRepository`] to a host.
pub struct PluginServer {
    repository: Arc<dyn ResourceRepository>,
    announcement: HandshakeAnnouncement,
}

impl PluginServer {
    /// Create a server that announces itself as a stdio plugin.
    pub fn new(repository: Arc<dyn ResourceRepository>) -> Self {
        Self {
            repository,
            announcement: HandshakeAnnouncement::stdio(),
        }
    }

    /// Override the handshake announcement.
    pub fn with_announcement(mut self, announcement: HandshakeAnnouncement) -> Self {
        self.announcement = announcement;
        self
    }

    /// Announce readiness, then serve requests from `reader` until EOF.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(&mut writer, &self.announcement).await?;

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let raw: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "ignoring unparseable request line");
                    continue;
                }
            };

            let response = match serde_json::from_value::<JsonRpcRequest>(raw.clone()) {
                Ok(request) => self.dispatch(request).await,
                Err(e) => match raw.get("id").and_then(Value::as_u64) {
                    Some(id) => JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(error_codes::INVALID_REQUEST, e.to_string()),
                    ),
                    None => {
                        warn!(error = %e, "ignoring request without id");
                        continue;
                    }
                },
            };

            write_line(&mut writer, &response).await?;
        }

        debug!("request stream closed");
        Ok(())
    }

    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let ctx = CallContext::new();
        let id = request.id;
        debug!(method = %request.method, id, "handling request");

        match request.method.as_str() {
            METHOD_FETCH => {
                let params: FetchParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return invalid_params(id, e),
                };
                match self.repository.fetch(&ctx, &params.resource).await {
                    Ok((blob, descriptor)) => encode(id, &FetchResult { blob, descriptor }),
                    Err(e) => JsonRpcResponse::failure(id, JsonRpcError::from(&e)),
                }
            }

            METHOD_PUSH => {
                let params: PushParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => return invalid_params(id, e),
                };
                match self
                    .repository
                    .push(&ctx, &params.resource, params.blob)
                    .await
                {
                    Ok(descriptor) => encode(id, &PushResult { descriptor }),
                    Err(e) => JsonRpcResponse::failure(id, JsonRpcError::from(&e)),
                }
            }

            method => JsonRpcResponse::failure(
                id,
                JsonRpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ),
            ),
        }
    }
}

/// Serve `repository` on stdin/stdout until the host closes stdin or the
/// process receives an interrupt.
///
/// The host's graceful-termination request is an interrupt, so plugins
/// built on this function exit cleanly on shutdown.
pub async fn serve_stdio(repository: Arc<dyn ResourceRepository>) -> std::io::Result<()> {
    let server = PluginServer::new(repository);
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        res = server.run(stdin, stdout) => {
            info!("host closed the connection");
            res
        }
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("interrupt received, shutting down");
            Ok(())
        }
    }
}

fn encode<T: Serialize>(id: u64, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(v) => JsonRpcResponse::success(id, v),
        Err(e) => JsonRpcResponse::failure(
            id,
            JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()),
        ),
    }
}

fn invalid_params(id: u64, err: serde_json::Error) -> JsonRpcResponse {
    JsonRpcResponse::failure(
        id,
        JsonRpcError::new(error_codes::INVALID_PARAMS, err.to_string()),
    )
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::resource::{Blob, ResourceRef};
    use serde_json::json;
    use std::io::Cursor;

    fn request_line(id: u64, method: &str, params: Value) -> String {
        let req = JsonRpcRequest::new(id, method, params);
        format!("{}\n", serde_json::to_string(&req).unwrap())
    }

    fn parse_lines(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("invalid JSON line"))
            .collect()
    }

    fn server() -> PluginServer {
        PluginServer::new(Arc::new(MemoryRepository::new()))
    }

    #[tokio::test]
    async fn announces_before_serving() {
        let mut output = Vec::new();
        server()
            .run(Cursor::new(Vec::new()), &mut output)
            .await
            .unwrap();

        let lines = parse_lines(&output);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["protocolVersion"], "1");
        assert_eq!(lines[0]["address"], "stdio");
    }

    #[tokio::test]
    async fn push_then_fetch_round_trip() {
        let resource = ResourceRef::new("app", "1.0");
        let blob = Blob::new("text/plain", b"payload".to_vec());
        let mut input = request_line(1, METHOD_PUSH, json!({"resource": resource, "blob": blob}));
        input.push_str(&request_line(2, METHOD_FETCH, json!({"resource": resource})));

        let mut output = Vec::new();
        server()
            .run(Cursor::new(input.into_bytes()), &mut output)
            .await
            .unwrap();

        let lines = parse_lines(&output);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["id"], 1);
        let digest = lines[1]["result"]["descriptor"]["digest"].clone();
        assert_eq!(lines[2]["id"], 2);
        assert_eq!(lines[2]["result"]["descriptor"]["digest"], digest);
        assert_eq!(lines[2]["result"]["blob"]["mediaType"], "text/plain");
    }

    #[tokio::test]
    async fn fetch_missing_reports_not_found_code() {
        let input = request_line(5, METHOD_FETCH, json!({"resource": {"name": "x", "version": "1"}}));
        let mut output = Vec::new();
        server()
            .run(Cursor::new(input.into_bytes()), &mut output)
            .await
            .unwrap();

        let lines = parse_lines(&output);
        assert_eq!(lines[1]["error"]["code"], error_codes::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_and_bad_params() {
        let mut input = request_line(1, "resource/delete", json!({}));
        input.push_str(&request_line(2, METHOD_PUSH, json!({"resource": 3})));
        input.push_str("{not json}\n");
        input.push_str("{\"jsonrpc\":\"2.0\",\"id\":9}\n");

        let mut output = Vec::new();
        server()
            .run(Cursor::new(input.into_bytes()), &mut output)
            .await
            .unwrap();

        let lines = parse_lines(&output);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1]["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(lines[2]["error"]["code"], error_codes::INVALID_PARAMS);
        assert_eq!(lines[3]["id"], 9);
        assert_eq!(lines[3]["error"]["code"], error_codes::INVALID_REQUEST);
    }
}
