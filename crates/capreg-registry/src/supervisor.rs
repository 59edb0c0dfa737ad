//! Lazy launch-or-reuse of external plugin processes.
//!
//! Each plugin identity owns a slot (a `tokio::sync::OnceCell`) created
//! under the registry lock. The first caller for an identity runs the
//! launch inside the slot; concurrent callers wait on the same slot and
//! share the result. A failed or cancelled launch leaves the slot empty
//! so the next caller retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use capreg_plugin::{CallContext, Interrupted, PluginDescriptor};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::ExternalRepository;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result, StartupCause};
use crate::launcher::PluginLauncher;
use crate::logs::forward_logs;
use crate::process::PluginProcess;
use crate::registry::RegistryState;
use crate::rpc::RpcClient;
use crate::shutdown;

/// Per-identity launch slot.
pub(crate) type Slot = Arc<OnceCell<Arc<ConstructedPlugin>>>;

/// A launched plugin: its capability adapter and its process.
pub struct ConstructedPlugin {
    repository: Arc<ExternalRepository>,
    process: Arc<dyn PluginProcess>,
    signalled: AtomicBool,
}

impl std::fmt::Debug for ConstructedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructedPlugin")
            .field("plugin", &self.repository.plugin_id())
            .field("pid", &self.process.id())
            .field("signalled", &self.signalled.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConstructedPlugin {
    pub(crate) fn new(repository: Arc<ExternalRepository>, process: Arc<dyn PluginProcess>) -> Self {
        Self {
            repository,
            process,
            signalled: AtomicBool::new(false),
        }
    }

    /// Identity of the plugin.
    pub fn plugin_id(&self) -> &str {
        self.repository.plugin_id()
    }

    /// The capability adapter.
    pub fn repository(&self) -> &Arc<ExternalRepository> {
        &self.repository
    }

    /// The process handle.
    pub fn process(&self) -> &Arc<dyn PluginProcess> {
        &self.process
    }

    /// Whether the process has gone away, either exited or with its RPC
    /// connection closed.
    pub fn has_exited(&self) -> bool {
        self.process.has_exited() || self.repository.is_disconnected()
    }

    /// Send the termination request unless one was already sent.
    ///
    /// Returns `None` when the plugin had already been signalled.
    pub(crate) fn request_termination(&self) -> Option<std::io::Result<()>> {
        if self.signalled.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.process.request_termination())
    }
}

/// Launches plugins on demand and caches them per identity.
pub(crate) struct Supervisor {
    launcher: Arc<dyn PluginLauncher>,
    config: RegistryConfig,
    log_token: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(launcher: Arc<dyn PluginLauncher>, config: RegistryConfig) -> Self {
        Self {
            launcher,
            config,
            log_token: CancellationToken::new(),
        }
    }

    pub(crate) fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the live plugin for `descriptor`, launching it if needed.
    pub(crate) async fn acquire(
        &self,
        state: &Mutex<RegistryState>,
        ctx: &CallContext,
        descriptor: &Arc<PluginDescriptor>,
    ) -> Result<Arc<ConstructedPlugin>> {
        let id = descriptor.id.as_str();
        let started = Instant::now();
        let slot = self.slot_for(state, id)?;

        let plugin = ctx
            .run(slot.get_or_try_init(|| self.construct(ctx, descriptor)))
            .await
            .map_err(|interrupted| match interrupted {
                Interrupted::Cancelled => RegistryError::Cancelled {
                    plugin: id.to_string(),
                },
                Interrupted::DeadlineExceeded => RegistryError::StartupFailure {
                    plugin: id.to_string(),
                    cause: StartupCause::NeverReady(started.elapsed()),
                },
            })??
            .clone();

        // Shutdown may have run while the launch was in flight.
        if state.lock().closed {
            if let Some(Err(e)) = shutdown::terminate(&plugin, self.config.termination_grace()) {
                warn!(plugin = %id, error = %e, "failed to signal plugin launched during shutdown");
            }
            return Err(RegistryError::Closed);
        }

        Ok(plugin)
    }

    fn slot_for(&self, state: &Mutex<RegistryState>, id: &str) -> Result<Slot> {
        let mut state = state.lock();
        if state.closed {
            return Err(RegistryError::Closed);
        }

        let slot = state.constructed.entry(id.to_string()).or_default().clone();
        if self.config.relaunch_exited
            && let Some(existing) = slot.get()
            && existing.has_exited()
        {
            info!(plugin = %id, "cached plugin has exited, relaunching");
            let fresh = Slot::default();
            state.constructed.insert(id.to_string(), fresh.clone());
            return Ok(fresh);
        }
        Ok(slot)
    }

    async fn construct(
        &self,
        ctx: &CallContext,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<ConstructedPlugin>> {
        let id = descriptor.id.as_str();
        debug!(plugin = %id, "launching plugin");
        let started = self.launcher.launch(ctx, descriptor).await?;

        if let Some(diagnostics) = started.diagnostics {
            tokio::spawn(forward_logs(
                id.to_string(),
                diagnostics,
                self.log_token.child_token(),
            ));
        }

        let repository = ExternalRepository::new(
            RpcClient::new(started.transport),
            id,
            descriptor.path.clone(),
            descriptor.config.clone(),
            started.address,
            descriptor.representative_schema().cloned(),
        );
        Ok(Arc::new(ConstructedPlugin::new(
            Arc::new(repository),
            started.process,
        )))
    }

    /// Grace period before signalled plugins are killed.
    pub(crate) fn termination_grace(&self) -> Option<Duration> {
        self.config.termination_grace()
    }

    /// Stop forwarding plugin diagnostics. With a grace period, plugins'
    /// exit messages are still forwarded until it elapses.
    pub(crate) fn stop_log_forwarding(&self) {
        let token = self.log_token.clone();
        match (
            self.termination_grace(),
            tokio::runtime::Handle::try_current(),
        ) {
            (Some(grace), Ok(handle)) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    token.cancel();
                });
            }
            _ => token.cancel(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_forwarding_logs(&self) -> bool {
        !self.log_token.is_cancelled()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.log_token.cancel();
    }
}
