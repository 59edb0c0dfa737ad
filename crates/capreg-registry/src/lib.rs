//! Plugin registry and process supervisor for capreg.
//!
//! [`PluginRegistry`] resolves a typed specification to the
//! [`ResourceRepository`](capreg_plugin::ResourceRepository) serving it.
//! In-process implementations are returned directly; external plugins are
//! launched as child processes on first use, shared by every later caller,
//! and asked to exit on [`shutdown`](PluginRegistry::shutdown).
//!
//! ```no_run
//! use capreg_plugin::{CallContext, LaunchSpec, PluginDescriptor, RESOURCE_REPOSITORY};
//! use capreg_registry::{PluginRegistry, RegistryConfig};
//! use capreg_types::{Raw, Type};
//!
//! # async fn demo() -> capreg_registry::Result<()> {
//! let registry = PluginRegistry::new(RegistryConfig::default());
//! let helm = Type::new("Helm", "v1");
//! registry.add_descriptor(
//!     PluginDescriptor::new("helm", LaunchSpec::new("/usr/libexec/capreg-helm"))
//!         .with_type(RESOURCE_REPOSITORY, helm.clone(), None),
//! )?;
//!
//! let repo = registry.get_capability(&CallContext::new(), &Raw::new(helm)).await?;
//! # let _ = repo;
//! registry.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod discovery;
pub mod error;
pub mod launcher;
pub mod logs;
pub mod process;
pub mod registry;
pub mod rpc;
pub mod transport;

mod shutdown;
mod supervisor;

pub use adapter::ExternalRepository;
pub use config::RegistryConfig;
pub use error::{RegistryError, Result, ShutdownErrors, StartupCause};
pub use launcher::{PluginLauncher, StartedPlugin, StdioLauncher};
pub use process::{ChildProcess, PluginProcess};
pub use registry::PluginRegistry;
pub use supervisor::ConstructedPlugin;
