//! Registry error types.

use std::fmt;
use std::time::Duration;

use capreg_plugin::protocol::JsonRpcError;
use capreg_types::{SchemeError, Type};
use thiserror::Error;

/// Why an external plugin failed to start.
#[derive(Debug, Error)]
pub enum StartupCause {
    /// The OS process could not be spawned.
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The process did not announce readiness in time.
    #[error("process did not become ready within {0:?}")]
    NeverReady(Duration),

    /// The process exited (or closed stdout) before announcing readiness.
    #[error("process exited before completing the handshake ({0})")]
    Exited(String),

    /// The announcement was malformed or incompatible.
    #[error("handshake protocol error: {0}")]
    Protocol(String),
}

/// One failed termination request.
#[derive(Debug)]
pub struct SignalFailure {
    /// Identity of the plugin whose process could not be signalled.
    pub plugin: String,
    /// The underlying error.
    pub error: std::io::Error,
}

/// Aggregated termination-request failures from a shutdown.
#[derive(Debug, Default)]
pub struct ShutdownErrors {
    failures: Vec<SignalFailure>,
}

impl ShutdownErrors {
    /// Record a failure.
    pub fn push(&mut self, plugin: impl Into<String>, error: std::io::Error) {
        self.failures.push(SignalFailure {
            plugin: plugin.into(),
            error,
        });
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Whether no failure was recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Iterate failures.
    pub fn iter(&self) -> impl Iterator<Item = &SignalFailure> {
        self.failures.iter()
    }

    /// Identities of the plugins that could not be signalled.
    pub fn plugins(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.plugin.as_str()).collect()
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.plugin, failure.error)?;
        }
        Ok(())
    }
}

/// Errors produced by the registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The type is already bound to a plugin.
    #[error("plugin for type {typ} already registered with id {existing}")]
    DuplicateRegistration {
        /// The contested type.
        typ: Type,
        /// Identity of the plugin already bound to it.
        existing: String,
    },

    /// Nothing, internal or external, is registered for the type.
    #[error("no plugin registered for type {0}")]
    NotRegistered(Type),

    /// The scheme marks the type as internal but no implementation is
    /// bound. Indicates a wiring bug.
    #[error("no internal plugin registered for type {0}")]
    MissingInternalImplementation(Type),

    /// An external plugin could not be started.
    #[error("plugin {plugin} failed to start: {cause}")]
    StartupFailure {
        /// Identity of the plugin.
        plugin: String,
        /// What went wrong.
        #[source]
        cause: StartupCause,
    },

    /// The caller's context ended before the plugin was acquired.
    #[error("acquiring plugin {plugin} was cancelled")]
    Cancelled {
        /// Identity of the plugin.
        plugin: String,
    },

    /// One or more termination requests failed during shutdown.
    #[error("failed to signal {n} plugin(s) during shutdown: {0}", n = .0.len())]
    ShutdownSignal(ShutdownErrors),

    /// The registry has been shut down.
    #[error("registry has been shut down")]
    Closed,

    /// A plugin descriptor failed validation.
    #[error("invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),

    /// Scheme lookup or import failed.
    #[error("scheme error: {0}")]
    Scheme(#[from] SchemeError),

    /// RPC transport-layer failure.
    #[error("rpc transport error: {0}")]
    RpcTransport(String),

    /// The plugin answered with a JSON-RPC error.
    #[error("rpc error: {0}")]
    Remote(JsonRpcError),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
