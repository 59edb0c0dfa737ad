//! JSON-RPC client over an [`RpcTransport`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use capreg_plugin::protocol::JsonRpcRequest;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{RegistryError, Result};
use crate::transport::RpcTransport;

/// Client for calling methods on a plugin.
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    request_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("request_id", &self.request_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Create a client over `transport`.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            request_id: AtomicU64::new(1),
        }
    }

    /// Call `method` with `params` and decode the result.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, serde_json::to_value(params)?);

        let response = self.transport.send_request(request).await?;

        if let Some(err) = response.error {
            return Err(RegistryError::Remote(err));
        }

        let result = response
            .result
            .ok_or_else(|| RegistryError::RpcTransport(format!("empty result for {method}")))?;
        Ok(serde_json::from_value(result)?)
    }

    /// Whether the underlying connection is closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }
}
