//! Scheme error types.

use thiserror::Error;

use crate::typ::Type;

/// Errors produced while registering or resolving types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    /// A type string could not be parsed.
    #[error("invalid type {0:?}: {1}")]
    InvalidType(String, &'static str),

    /// The prototype's Rust type was never registered with the scheme.
    #[error("prototype {0} is not registered in the scheme")]
    UnknownPrototype(&'static str),

    /// The type (or one of its aliases) is already registered.
    #[error("type {0} is already registered")]
    AlreadyRegistered(Type),

    /// The type is not known to the scheme.
    #[error("type {0} is not registered in the scheme")]
    NotRegistered(Type),

    /// Importing a type would rebind an existing entry to a different
    /// canonical type.
    #[error("type {typ} is already bound to canonical type {existing}")]
    Conflict {
        /// The type being imported.
        typ: Type,
        /// The canonical type it is already bound to.
        existing: Type,
    },
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, SchemeError>;
