//! Resource references, content blobs, and content descriptors.

use serde::{Deserialize, Serialize};
use sha2::Digest;

/// Identifies a resource within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource name.
    pub name: String,
    /// Resource version.
    pub version: String,
    /// Backend-specific access specification, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub access: serde_json::Value,
}

impl ResourceRef {
    /// Create a reference without an access specification.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            access: serde_json::Value::Null,
        }
    }

    /// `name:version`, used as a storage key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

/// Resource content with its media type.
///
/// The payload travels base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    /// Media type of the content.
    pub media_type: String,
    /// Raw content.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a blob.
    pub fn new(media_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Describe this blob: sha256 digest, size, and media type.
    pub fn descriptor(&self) -> ResourceDescriptor {
        let hash = sha2::Sha256::digest(&self.data);
        ResourceDescriptor {
            digest: format!("sha256:{}", hex_encode(&hash)),
            size: self.data.len() as u64,
            media_type: self.media_type.clone(),
        }
    }
}

/// Content-addressed description of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// `sha256:<hex>` digest of the content.
    pub digest: String,
    /// Content size in bytes.
    pub size: u64,
    /// Media type of the content.
    pub media_type: String,
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
