//! Launching plugin processes and waiting for their handshake.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capreg_plugin::protocol::{HandshakeAnnouncement, PROTOCOL_VERSION};
use capreg_plugin::{CallContext, PluginDescriptor};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result, StartupCause};
use crate::process::{ChildProcess, PluginProcess};
use crate::transport::{RpcTransport, StdioTransport};

/// A plugin process that has completed its handshake.
pub struct StartedPlugin {
    /// RPC connection to the plugin.
    pub transport: Arc<dyn RpcTransport>,
    /// Address from the handshake announcement.
    pub address: String,
    /// The running process.
    pub process: Arc<dyn PluginProcess>,
    /// The plugin's diagnostic stream (stderr), if captured.
    pub diagnostics: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl std::fmt::Debug for StartedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartedPlugin")
            .field("address", &self.address)
            .field("pid", &self.process.id())
            .finish_non_exhaustive()
    }
}

/// Starts plugin processes.
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    /// Launch the plugin described by `descriptor` and wait for its
    /// handshake, bounded by `ctx`.
    ///
    /// A process that fails its handshake must not be left running.
    async fn launch(&self, ctx: &CallContext, descriptor: &PluginDescriptor)
    -> Result<StartedPlugin>;
}

/// Launches plugins as child processes speaking JSON-RPC over stdio.
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl StdioLauncher {
    /// Create a launcher with timeouts from `config`.
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

#[async_trait]
impl PluginLauncher for StdioLauncher {
    async fn launch(
        &self,
        ctx: &CallContext,
        descriptor: &PluginDescriptor,
    ) -> Result<StartedPlugin> {
        let plugin = descriptor.id.as_str();
        let command = resolve_command(descriptor);
        debug!(plugin, command = %command.display(), "spawning plugin");

        let mut cmd = Command::new(&command);
        cmd.args(&descriptor.launch.args)
            .envs(&descriptor.launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.launch.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| startup(plugin, StartupCause::Spawn(e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Arc::new(ChildProcess::new(child));

        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            kill_quietly(plugin, process.as_ref());
            return Err(startup(
                plugin,
                StartupCause::Spawn(std::io::Error::other("failed to capture plugin stdio")),
            ));
        };

        let mut reader = BufReader::new(stdout);
        let announcement =
            match await_handshake(plugin, ctx, &mut reader, self.handshake_timeout).await {
                Ok(announcement) => announcement,
                Err(e) => {
                    kill_quietly(plugin, process.as_ref());
                    return Err(e);
                }
            };

        info!(plugin, pid = ?process.id(), address = %announcement.address, "plugin started");

        let transport = StdioTransport::new(stdin, reader, self.request_timeout);
        Ok(StartedPlugin {
            transport: Arc::new(transport),
            address: announcement.address,
            process,
            diagnostics: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
        })
    }
}

/// Read and validate the handshake announcement from `reader`.
///
/// The wait ends at the earlier of the context deadline and `timeout` from
/// now, or when the context is cancelled.
pub async fn await_handshake<R>(
    plugin: &str,
    ctx: &CallContext,
    reader: &mut R,
    timeout: Duration,
) -> Result<HandshakeAnnouncement>
where
    R: AsyncBufRead + Unpin,
{
    let deadline = ctx.deadline_within(timeout);
    let budget = deadline.saturating_duration_since(Instant::now());

    let mut line = String::new();
    let read = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => {
            return Err(RegistryError::Cancelled { plugin: plugin.to_string() });
        }
        _ = tokio::time::sleep_until(deadline) => {
            return Err(startup(plugin, StartupCause::NeverReady(budget)));
        }
        read = reader.read_line(&mut line) => read,
    };

    match read {
        Ok(0) => Err(startup(
            plugin,
            StartupCause::Exited("output closed".into()),
        )),
        Ok(_) => parse_announcement(line.trim()).map_err(|cause| startup(plugin, cause)),
        Err(e) => Err(startup(
            plugin,
            StartupCause::Exited(format!("failed to read output: {e}")),
        )),
    }
}

fn parse_announcement(line: &str) -> std::result::Result<HandshakeAnnouncement, StartupCause> {
    let announcement: HandshakeAnnouncement = serde_json::from_str(line)
        .map_err(|e| StartupCause::Protocol(format!("malformed announcement {line:?}: {e}")))?;

    if announcement.protocol_version != PROTOCOL_VERSION {
        return Err(StartupCause::Protocol(format!(
            "unsupported protocol version {}, expected {PROTOCOL_VERSION}",
            announcement.protocol_version
        )));
    }
    if announcement.address.is_empty() {
        return Err(StartupCause::Protocol("announcement has no address".into()));
    }
    Ok(announcement)
}

/// Relative commands with a directory part resolve against the directory
/// the descriptor was loaded from. Bare names go through `PATH`.
fn resolve_command(descriptor: &PluginDescriptor) -> PathBuf {
    let command = &descriptor.launch.command;
    if command.is_relative()
        && command.components().count() > 1
        && let Some(dir) = descriptor.path.parent()
    {
        return dir.join(command);
    }
    command.clone()
}

fn kill_quietly(plugin: &str, process: &dyn PluginProcess) {
    if let Err(e) = process.kill() {
        warn!(plugin, error = %e, "failed to kill plugin after failed start");
    }
}

fn startup(plugin: &str, cause: StartupCause) -> RegistryError {
    RegistryError::StartupFailure {
        plugin: plugin.to_string(),
        cause,
    }
}
