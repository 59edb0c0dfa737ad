//! # capreg-types
//!
//! Type identifiers for the capreg plugin registry.
//!
//! This crate is the foundation of the dependency graph -- every other
//! capreg crate depends on it. It contains:
//!
//! - **[`typ`]** -- [`Type`] (kind + version), the [`Typed`] trait for
//!   specification values, and [`Raw`], an untyped specification
//! - **[`scheme`]** -- [`Scheme`], the table mapping prototypes and alias
//!   types onto canonical types
//! - **[`error`]** -- [`SchemeError`]

pub mod error;
pub mod scheme;
pub mod typ;

pub use error::{Result, SchemeError};
pub use scheme::Scheme;
pub use typ::{Raw, Type, Typed};
