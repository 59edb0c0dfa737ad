//! Host-side [`ResourceRepository`] that forwards calls to a plugin
//! process over JSON-RPC.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capreg_plugin::protocol::{
    FetchParams, FetchResult, METHOD_FETCH, METHOD_PUSH, PushParams, PushResult,
};
use capreg_plugin::{Blob, CallContext, PluginError, ResourceDescriptor, ResourceRef, ResourceRepository};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::RegistryError;
use crate::rpc::RpcClient;

/// Adapter exposing a running plugin process as a [`ResourceRepository`].
#[derive(Debug)]
pub struct ExternalRepository {
    client: RpcClient,
    plugin_id: String,
    path: PathBuf,
    config: Value,
    address: String,
    json_schema: Option<Value>,
}

impl ExternalRepository {
    /// Build an adapter for the plugin `plugin_id`.
    pub fn new(
        client: RpcClient,
        plugin_id: impl Into<String>,
        path: impl Into<PathBuf>,
        config: Value,
        address: impl Into<String>,
        json_schema: Option<Value>,
    ) -> Self {
        Self {
            client,
            plugin_id: plugin_id.into(),
            path: path.into(),
            config,
            address: address.into(),
            json_schema,
        }
    }

    /// Identity of the plugin.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Location the plugin was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opaque plugin configuration from the descriptor.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Address announced in the handshake.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Representative JSON schema advertised by the plugin.
    pub fn json_schema(&self) -> Option<&Value> {
        self.json_schema.as_ref()
    }

    /// Whether the RPC connection to the plugin has closed.
    pub fn is_disconnected(&self) -> bool {
        self.client.is_closed()
    }

    async fn call<P, R>(&self, ctx: &CallContext, method: &str, params: &P) -> Result<R, PluginError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!(plugin = %self.plugin_id, method, "forwarding call to plugin");
        ctx.run(self.client.call(method, params))
            .await?
            .map_err(into_plugin_error)
    }
}

fn into_plugin_error(err: RegistryError) -> PluginError {
    match err {
        RegistryError::Remote(e) => PluginError::from(e),
        RegistryError::Json(e) => PluginError::Serialization(e),
        other => PluginError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ResourceRepository for ExternalRepository {
    async fn fetch(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
    ) -> Result<(Blob, ResourceDescriptor), PluginError> {
        let params = FetchParams {
            resource: resource.clone(),
        };
        let result: FetchResult = self.call(ctx, METHOD_FETCH, &params).await?;
        Ok((result.blob, result.descriptor))
    }

    async fn push(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
        content: Blob,
    ) -> Result<ResourceDescriptor, PluginError> {
        let params = PushParams {
            resource: resource.clone(),
            blob: content,
        };
        let result: PushResult = self.call(ctx, METHOD_PUSH, &params).await?;
        Ok(result.descriptor)
    }
}
