//! Capability trait definitions.
//!
//! [`ResourceRepository`] is the interface a consumer receives from the
//! registry. In-process implementations implement it directly; external
//! plugins are reached through an adapter in `capreg-registry` that
//! implements it on top of the plugin's RPC connection.
//!
//! All traits are `Send + Sync`. Async methods use `#[async_trait]`.

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::PluginError;
use crate::resource::{Blob, ResourceDescriptor, ResourceRef};

/// Read/write access to resources of one or more types.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Fetch a resource's content and descriptor.
    ///
    /// Returns [`PluginError::NotFound`] when the resource does not exist.
    async fn fetch(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
    ) -> Result<(Blob, ResourceDescriptor), PluginError>;

    /// Store content for a resource and return its descriptor.
    async fn push(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
        content: Blob,
    ) -> Result<ResourceDescriptor, PluginError>;
}

impl std::fmt::Debug for dyn ResourceRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ResourceRepository")
    }
}
