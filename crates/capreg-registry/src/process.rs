//! Handles on plugin OS processes.
//!
//! [`PluginProcess`] abstracts the two things the registry ever does to a
//! running plugin: ask it to exit, and (after a grace period, or when the
//! handshake fails) force it to. [`ChildProcess`] implements it for a
//! `tokio::process::Child`.

use std::io;

use parking_lot::Mutex;
use tokio::process::Child;
use tracing::debug;

/// A running plugin process.
pub trait PluginProcess: Send + Sync {
    /// OS process id, if still known.
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit gracefully.
    ///
    /// On unix this is `SIGINT`; elsewhere the process is killed.
    fn request_termination(&self) -> io::Result<()>;

    /// Whether the process has exited.
    fn has_exited(&self) -> bool;

    /// Forcefully kill the process.
    fn kill(&self) -> io::Result<()>;
}

/// [`PluginProcess`] backed by a spawned child.
#[derive(Debug)]
pub struct ChildProcess {
    child: Mutex<Child>,
}

impl ChildProcess {
    /// Wrap a spawned child.
    pub fn new(child: Child) -> Self {
        Self {
            child: Mutex::new(child),
        }
    }

    /// Exit status rendered for diagnostics, if the process has exited.
    pub fn exit_status(&self) -> Option<String> {
        match self.child.lock().try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            _ => None,
        }
    }
}

impl PluginProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.lock().id()
    }

    fn request_termination(&self) -> io::Result<()> {
        let mut child = self.child.lock();
        if let Some(status) = child.try_wait()? {
            debug!(%status, "process already exited, nothing to signal");
            return Ok(());
        }

        #[cfg(unix)]
        {
            let Some(pid) = child.id() else {
                return Ok(());
            };
            // SAFETY: pid belongs to a child we spawned and have not yet
            // reaped, so it cannot have been recycled. SIGINT requests
            // interruption.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            child.start_kill()
        }
    }

    fn has_exited(&self) -> bool {
        !matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn kill(&self) -> io::Result<()> {
        let mut child = self.child.lock();
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.start_kill()
    }
}
