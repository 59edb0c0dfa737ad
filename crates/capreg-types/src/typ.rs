//! Structured type identifiers.
//!
//! A [`Type`] is the dispatch key of the registry: a kind plus an optional
//! version, written `kind/version` (or just `kind` when unversioned).
//! Specification values expose their type through the [`Typed`] trait.

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemeError;

/// A structured type identifier: kind plus optional version.
///
/// Equality, hashing, and ordering are by value, so a `Type` can be used
/// directly as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Type {
    kind: String,
    version: Option<String>,
}

impl Type {
    /// Create a fully-qualified type.
    pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: Some(version.into()),
        }
    }

    /// Create a type without a version.
    pub fn unversioned(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            version: None,
        }
    }

    /// The kind component.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The version component, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether the type carries a version.
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// A copy of this type with the given version.
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self::new(self.kind.clone(), version)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}", self.kind, version),
            None => f.write_str(&self.kind),
        }
    }
}

impl FromStr for Type {
    type Err = SchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, version) = match s.rsplit_once('/') {
            Some((kind, version)) => (kind, Some(version)),
            None => (s, None),
        };

        if kind.is_empty() {
            return Err(SchemeError::InvalidType(s.to_string(), "empty kind"));
        }

        match version {
            Some("") => Err(SchemeError::InvalidType(s.to_string(), "empty version")),
            Some(version) => Ok(Self::new(kind, version)),
            None => Ok(Self::unversioned(kind)),
        }
    }
}

impl TryFrom<String> for Type {
    type Error = SchemeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(value: Type) -> Self {
        value.to_string()
    }
}

/// A specification value that carries a [`Type`].
///
/// The Rust type of the value acts as its prototype: a [`Scheme`](crate::Scheme)
/// maps prototypes onto canonical types, which is how an untyped value
/// can still be resolved.
pub trait Typed: Any + Send + Sync + 'static {
    /// The type named by this value, or `None` when the value leaves it
    /// to its prototype.
    fn typ(&self) -> Option<Type>;

    /// Name of the implementing Rust type, used in error messages.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// An untyped specification: a type plus an opaque JSON body.
///
/// Useful when a specification arrives from configuration and has no
/// dedicated Rust type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raw {
    /// The type named by the specification.
    #[serde(rename = "type")]
    pub typ: Type,

    /// Remaining specification fields.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

impl Raw {
    /// Create a raw specification with an empty body.
    pub fn new(typ: Type) -> Self {
        Self {
            typ,
            body: serde_json::Map::new(),
        }
    }
}

impl Typed for Raw {
    fn typ(&self) -> Option<Type> {
        Some(self.typ.clone())
    }
}
