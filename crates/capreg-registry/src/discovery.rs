//! Plugin descriptor discovery.
//!
//! Scans a directory for descriptor manifests (`*.json` or `*.toml`, one
//! [`PluginDescriptor`] per file). Unreadable or invalid manifests are
//! logged and skipped.

use std::path::{Path, PathBuf};

use capreg_plugin::PluginDescriptor;
use tracing::{debug, info, warn};

/// Discover plugin descriptors in `dir`, ordered by manifest path.
///
/// A descriptor without a `path` gets the path of its manifest, so
/// relative launch commands resolve next to it.
pub fn discover(dir: &Path) -> Vec<PluginDescriptor> {
    let mut discovered = Vec::new();

    if !dir.is_dir() {
        debug!(path = %dir.display(), "plugin directory not found");
        return discovered;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read plugin directory");
            return discovered;
        }
    };

    let mut manifests: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && manifest_format(path).is_some())
        .collect();
    manifests.sort();

    for path in manifests {
        match load_manifest(&path) {
            Ok(descriptor) => {
                info!(path = %path.display(), plugin = %descriptor.id, "discovered plugin");
                discovered.push(descriptor);
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "skipping plugin manifest");
            }
        }
    }

    discovered
}

#[derive(Clone, Copy)]
enum Format {
    Json,
    Toml,
}

fn manifest_format(path: &Path) -> Option<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Some(Format::Json),
        Some("toml") => Some(Format::Toml),
        _ => None,
    }
}

fn load_manifest(path: &Path) -> Result<PluginDescriptor, String> {
    let format = manifest_format(path).ok_or_else(|| "unsupported extension".to_string())?;
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;

    let mut descriptor: PluginDescriptor = match format {
        Format::Json => serde_json::from_str(&content).map_err(|e| e.to_string())?,
        Format::Toml => toml::from_str(&content).map_err(|e| e.to_string())?,
    };

    if descriptor.path.as_os_str().is_empty() {
        descriptor.path = path.to_path_buf();
    }
    descriptor.validate().map_err(|e| e.to_string())?;
    Ok(descriptor)
}
