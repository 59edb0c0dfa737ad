//! In-memory resource repository.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::CallContext;
use crate::error::PluginError;
use crate::resource::{Blob, ResourceDescriptor, ResourceRef};
use crate::traits::ResourceRepository;

/// A [`ResourceRepository`] that keeps content in memory, keyed by
/// `name:version`.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    blobs: RwLock<HashMap<String, Blob>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Whether the repository is empty.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ResourceRepository for MemoryRepository {
    async fn fetch(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
    ) -> Result<(Blob, ResourceDescriptor), PluginError> {
        if ctx.is_cancelled() {
            return Err(PluginError::Cancelled);
        }

        let key = resource.key();
        let blobs = self.blobs.read().await;
        let blob = blobs
            .get(&key)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(key))?;
        let descriptor = blob.descriptor();
        Ok((blob, descriptor))
    }

    async fn push(
        &self,
        ctx: &CallContext,
        resource: &ResourceRef,
        content: Blob,
    ) -> Result<ResourceDescriptor, PluginError> {
        if ctx.is_cancelled() {
            return Err(PluginError::Cancelled);
        }

        let descriptor = content.descriptor();
        let key = resource.key();
        debug!(key = %key, digest = %descriptor.digest, "storing resource");
        self.blobs.write().await.insert(key, content);
        Ok(descriptor)
    }
}
