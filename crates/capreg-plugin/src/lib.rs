//! Capability traits and plugin-side plumbing for capreg.
//!
//! This crate defines what a consumer of the registry ultimately talks to
//! and what an external plugin has to speak:
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`ResourceRepository`] | The capability interface (`fetch` / `push`) |
//! | [`CallContext`] | Cancellation and deadline carried through every call |
//! | [`PluginDescriptor`] | Static metadata about a launchable external plugin |
//! | [`protocol`] | Handshake announcement and JSON-RPC wire types |
//! | [`PluginServer`] | Serves a repository over newline-delimited JSON-RPC |
//! | [`MemoryRepository`] | In-memory repository, for tests and the sample plugin |

pub mod context;
pub mod descriptor;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod resource;
pub mod server;
pub mod traits;

pub use context::{CallContext, CancellationToken, Interrupted};
pub use descriptor::{AdvertisedType, LaunchSpec, PluginDescriptor, RESOURCE_REPOSITORY};
pub use error::{PluginError, Result};
pub use memory::MemoryRepository;
pub use resource::{Blob, ResourceDescriptor, ResourceRef};
pub use server::{PluginServer, serve_stdio};
pub use traits::ResourceRepository;
