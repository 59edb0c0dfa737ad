//! Coordinated termination of live plugins.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ShutdownErrors;
use crate::supervisor::ConstructedPlugin;

/// Signal every plugin in `plugins` once, collecting failures.
///
/// Every plugin is attempted regardless of earlier failures. Nothing is
/// awaited; with a grace period, a watchdog kills any plugin still running
/// once it elapses.
pub(crate) fn signal_all<'a>(
    plugins: impl IntoIterator<Item = &'a Arc<ConstructedPlugin>>,
    grace: Option<Duration>,
) -> ShutdownErrors {
    let mut errors = ShutdownErrors::default();
    let mut signalled = 0usize;

    for plugin in plugins {
        match terminate(plugin, grace) {
            None => debug!(plugin = %plugin.plugin_id(), "plugin already signalled"),
            Some(Ok(())) => signalled += 1,
            Some(Err(e)) => {
                warn!(plugin = %plugin.plugin_id(), error = %e, "failed to signal plugin");
                errors.push(plugin.plugin_id(), e);
            }
        }
    }

    info!(signalled, failed = errors.len(), "plugin shutdown requested");
    errors
}

/// Send one plugin its termination request and arm the kill watchdog.
///
/// Returns `None` if the plugin had already been signalled.
pub(crate) fn terminate(
    plugin: &Arc<ConstructedPlugin>,
    grace: Option<Duration>,
) -> Option<std::io::Result<()>> {
    let outcome = plugin.request_termination()?;
    if outcome.is_ok()
        && let Some(grace) = grace
    {
        spawn_watchdog(Arc::clone(plugin), grace);
    }
    Some(outcome)
}

fn spawn_watchdog(plugin: Arc<ConstructedPlugin>, grace: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(plugin = %plugin.plugin_id(), "no async runtime, skipping termination watchdog");
        return;
    };

    handle.spawn(async move {
        tokio::time::sleep(grace).await;
        if plugin.process().has_exited() {
            return;
        }
        warn!(
            plugin = %plugin.plugin_id(),
            grace_secs = grace.as_secs(),
            "plugin still running after grace period, killing"
        );
        if let Err(e) = plugin.process().kill() {
            warn!(plugin = %plugin.plugin_id(), error = %e, "failed to kill plugin");
        }
    });
}
