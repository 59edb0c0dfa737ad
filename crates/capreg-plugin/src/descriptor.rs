//! Plugin descriptor types.
//!
//! A [`PluginDescriptor`] is the static metadata a discovery step supplies
//! for each external plugin: its identity, how to launch it, which types it
//! serves for which capability, and an opaque configuration payload. The
//! registry only stores and indexes descriptors.

use std::collections::BTreeMap;
use std::path::PathBuf;

use capreg_types::Type;
use serde::{Deserialize, Serialize};

use crate::PluginError;

/// Capability key for resource repositories in [`PluginDescriptor::types`].
pub const RESOURCE_REPOSITORY: &str = "resourceRepository";

/// How to start a plugin process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSpec {
    /// Executable to run.
    pub command: PathBuf,

    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Launch `command` with no arguments.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A type a plugin serves, with an optional JSON schema for its
/// specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedType {
    /// The served type.
    #[serde(rename = "type")]
    pub typ: Type,

    /// JSON schema of the specification, if the plugin publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<serde_json::Value>,
}

/// Static metadata about a launchable external plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Unique plugin identity.
    pub id: String,

    /// Location the plugin was discovered at.
    #[serde(default)]
    pub path: PathBuf,

    /// How to start the plugin.
    pub launch: LaunchSpec,

    /// Advertised types, grouped by capability (e.g. [`RESOURCE_REPOSITORY`]).
    ///
    /// A `BTreeMap` so enumeration order is stable.
    #[serde(default)]
    pub types: BTreeMap<String, Vec<AdvertisedType>>,

    /// Configuration payload handed to the plugin.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginDescriptor {
    /// Create a descriptor with no advertised types.
    pub fn new(id: impl Into<String>, launch: LaunchSpec) -> Self {
        Self {
            id: id.into(),
            path: PathBuf::new(),
            launch,
            types: BTreeMap::new(),
            config: serde_json::Value::Null,
        }
    }

    /// Advertise `typ` for `capability`.
    pub fn with_type(
        mut self,
        capability: impl Into<String>,
        typ: Type,
        json_schema: Option<serde_json::Value>,
    ) -> Self {
        self.types
            .entry(capability.into())
            .or_default()
            .push(AdvertisedType { typ, json_schema });
        self
    }

    /// Every advertised type, in stable order.
    pub fn advertised_types(&self) -> impl Iterator<Item = &AdvertisedType> {
        self.types.values().flatten()
    }

    /// Types advertised for one capability.
    pub fn types_for(&self, capability: &str) -> &[AdvertisedType] {
        self.types.get(capability).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Schema of the first advertised type, if it has one.
    pub fn representative_schema(&self) -> Option<&serde_json::Value> {
        self.advertised_types()
            .next()
            .and_then(|t| t.json_schema.as_ref())
    }

    /// Validate the descriptor. Returns the first failure found.
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() {
            return Err(PluginError::InvalidDescriptor(
                "plugin id must not be empty".into(),
            ));
        }

        if self.launch.command.as_os_str().is_empty() {
            return Err(PluginError::InvalidDescriptor(format!(
                "plugin {}: launch command must not be empty",
                self.id
            )));
        }

        if self.advertised_types().next().is_none() {
            return Err(PluginError::InvalidDescriptor(format!(
                "plugin {}: must advertise at least one type",
                self.id
            )));
        }

        Ok(())
    }
}
