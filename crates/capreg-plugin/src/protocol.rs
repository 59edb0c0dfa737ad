//! Wire types shared by the host and external plugins.
//!
//! A plugin process speaks newline-delimited JSON on its stdio:
//!
//! 1. The first line it writes to stdout is a [`HandshakeAnnouncement`].
//! 2. After that, the host writes [`JsonRpcRequest`] lines to the plugin's
//!    stdin and the plugin answers with [`JsonRpcResponse`] lines.
//! 3. Diagnostics go to stderr, which the host forwards to its log sink.
//!
//! Capability errors keep their classification across the boundary via
//! [`error_codes`].

use serde::{Deserialize, Serialize};

use crate::PluginError;
use crate::resource::{Blob, ResourceDescriptor, ResourceRef};

/// Protocol version announced in the handshake.
pub const PROTOCOL_VERSION: &str = "1";

/// JSON-RPC method for [`ResourceRepository::fetch`](crate::ResourceRepository::fetch).
pub const METHOD_FETCH: &str = "resource/fetch";

/// JSON-RPC method for [`ResourceRepository::push`](crate::ResourceRepository::push).
pub const METHOD_PUSH: &str = "resource/push";

/// JSON-RPC error codes.
pub mod error_codes {
    /// The request line was not valid JSON-RPC.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Parameters did not match the method.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unclassified failure inside the plugin.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// [`PluginError::NotFound`](crate::PluginError::NotFound).
    pub const NOT_FOUND: i32 = -32004;
    /// [`PluginError::Unsupported`](crate::PluginError::Unsupported).
    pub const UNSUPPORTED: i32 = -32005;
}

/// Readiness announcement a plugin writes as its first stdout line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAnnouncement {
    /// Protocol version spoken by the plugin.
    pub protocol_version: String,
    /// Address the plugin serves on (`stdio` for the stdio transport).
    pub address: String,
}

impl HandshakeAnnouncement {
    /// Announcement for a plugin serving over stdio.
    pub fn stdio() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            address: "stdio".to_string(),
        }
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
}

fn default_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier this response corresponds to.
    pub id: u64,
    /// Successful result (mutually exclusive with `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error result (mutually exclusive with `result`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success response.
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Optional structured error data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// An error without data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code={}, message={}", self.code, self.message)
    }
}

impl From<&PluginError> for JsonRpcError {
    fn from(err: &PluginError) -> Self {
        match err {
            PluginError::NotFound(msg) => Self::new(error_codes::NOT_FOUND, msg.clone()),
            PluginError::Unsupported(msg) => Self::new(error_codes::UNSUPPORTED, msg.clone()),
            PluginError::Remote { code, message } => Self::new(*code, message.clone()),
            other => Self::new(error_codes::INTERNAL_ERROR, other.to_string()),
        }
    }
}

impl From<JsonRpcError> for PluginError {
    fn from(err: JsonRpcError) -> Self {
        match err.code {
            error_codes::NOT_FOUND => PluginError::NotFound(err.message),
            error_codes::UNSUPPORTED => PluginError::Unsupported(err.message),
            code => PluginError::Remote {
                code,
                message: err.message,
            },
        }
    }
}

/// Parameters of [`METHOD_FETCH`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchParams {
    /// Resource to fetch.
    pub resource: ResourceRef,
}

/// Result of [`METHOD_FETCH`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    /// Resource content.
    pub blob: Blob,
    /// Descriptor of the content.
    pub descriptor: ResourceDescriptor,
}

/// Parameters of [`METHOD_PUSH`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushParams {
    /// Resource to store.
    pub resource: ResourceRef,
    /// Content to store.
    pub blob: Blob,
}

/// Result of [`METHOD_PUSH`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    /// Descriptor of the stored content.
    pub descriptor: ResourceDescriptor,
}
