//! Type scheme: prototypes, canonical types, and aliases.
//!
//! A [`Scheme`] answers three questions for the registry:
//!
//! 1. Which canonical [`Type`] does a prototype (a Rust type implementing
//!    [`Typed`]) stand for?
//! 2. Which types are aliases of one another?
//! 3. What is the fully-qualified type for a specification that omits its
//!    version (or its type altogether)?
//!
//! Schemes can import entries from one another with
//! [`Scheme::import_type`]. That is how an in-process implementation,
//! defined against its own private scheme, teaches the host scheme that a
//! type is served internally.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::{Result, SchemeError};
use crate::typ::{Type, Typed};

/// Bidirectional table of canonical types, aliases, and prototypes.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    /// Prototype Rust type -> canonical type.
    prototypes: HashMap<TypeId, Type>,
    /// Every known type (canonical or alias) -> its canonical type.
    canonical: HashMap<Type, Type>,
    /// Canonical type -> aliases, in registration order.
    aliases: HashMap<Type, Vec<Type>>,
    /// Kind -> fully-qualified type used when a version is omitted.
    defaults: HashMap<String, Type>,
}

impl Scheme {
    /// Create an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register prototype `P` under the canonical type `typ` with the given
    /// aliases.
    ///
    /// Fails without modifying the scheme if `P`, `typ`, or any alias is
    /// already registered.
    pub fn register<P: Typed>(
        &mut self,
        typ: Type,
        aliases: impl IntoIterator<Item = Type>,
    ) -> Result<()> {
        let mut unique: Vec<Type> = Vec::new();
        for alias in aliases {
            if alias != typ && !unique.contains(&alias) {
                unique.push(alias);
            }
        }

        if let Some(existing) = self.prototypes.get(&TypeId::of::<P>()) {
            return Err(SchemeError::AlreadyRegistered(existing.clone()));
        }
        if let Some(taken) = std::iter::once(&typ)
            .chain(&unique)
            .find(|t| self.canonical.contains_key(*t))
        {
            return Err(SchemeError::AlreadyRegistered(taken.clone()));
        }

        self.prototypes.insert(TypeId::of::<P>(), typ.clone());
        self.insert_entry(&typ, &unique);
        Ok(())
    }

    /// Canonical type registered for the Rust type of `prototype`.
    pub fn type_for_prototype(&self, prototype: &dyn Typed) -> Result<Type> {
        self.prototypes
            .get(&Any::type_id(prototype))
            .cloned()
            .ok_or_else(|| SchemeError::UnknownPrototype(prototype.type_name()))
    }

    /// Canonical type registered for prototype `P`.
    pub fn type_for<P: Typed>(&self) -> Result<Type> {
        self.prototypes
            .get(&TypeId::of::<P>())
            .cloned()
            .ok_or(SchemeError::UnknownPrototype(std::any::type_name::<P>()))
    }

    /// Resolve the type a specification should be dispatched on.
    ///
    /// - No type on the value: the prototype's canonical type.
    /// - Versioned, or an exact registered entry: returned unchanged.
    /// - Unversioned with a known default for its kind: the default.
    /// - Otherwise: returned unchanged, so callers see it as unregistered.
    ///
    /// Resolving an already resolved type yields the same type.
    pub fn default_type(&self, spec: &dyn Typed) -> Result<Type> {
        let Some(typ) = spec.typ() else {
            return self.type_for_prototype(spec);
        };

        if typ.is_versioned() || self.canonical.contains_key(&typ) {
            return Ok(typ);
        }

        Ok(self.defaults.get(typ.kind()).cloned().unwrap_or(typ))
    }

    /// Whether `typ` is registered, either canonically or as an alias.
    pub fn is_registered(&self, typ: &Type) -> bool {
        self.canonical.contains_key(typ)
    }

    /// The canonical type `typ` resolves to.
    pub fn canonical_of(&self, typ: &Type) -> Option<&Type> {
        self.canonical.get(typ)
    }

    /// Aliases of the canonical type `typ` resolves to.
    ///
    /// Returns an empty list for unknown types.
    pub fn aliases_of(&self, typ: &Type) -> Vec<Type> {
        self.canonical
            .get(typ)
            .and_then(|canonical| self.aliases.get(canonical))
            .cloned()
            .unwrap_or_default()
    }

    /// Iterate canonical types together with their aliases.
    pub fn types(&self) -> impl Iterator<Item = (&Type, &[Type])> {
        self.aliases.iter().map(|(t, a)| (t, a.as_slice()))
    }

    /// Number of canonical types.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether the scheme has no types.
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Import the entry for `typ` from `other`: its canonical type, aliases,
    /// prototypes, and default versions.
    ///
    /// Importing an entry that is already present is a no-op. Fails without
    /// modifying this scheme if any of the types or prototypes is bound to
    /// a different canonical type here.
    pub fn import_type(&mut self, other: &Scheme, typ: &Type) -> Result<()> {
        let canonical = other
            .canonical_of(typ)
            .cloned()
            .ok_or_else(|| SchemeError::NotRegistered(typ.clone()))?;
        let aliases = other.aliases.get(&canonical).cloned().unwrap_or_default();

        for t in std::iter::once(&canonical).chain(&aliases) {
            if let Some(existing) = self.canonical.get(t)
                && existing != &canonical
            {
                return Err(SchemeError::Conflict {
                    typ: t.clone(),
                    existing: existing.clone(),
                });
            }
        }

        let prototypes: Vec<TypeId> = other
            .prototypes
            .iter()
            .filter(|(_, t)| **t == canonical)
            .map(|(id, _)| *id)
            .collect();
        for id in &prototypes {
            if let Some(existing) = self.prototypes.get(id)
                && existing != &canonical
            {
                return Err(SchemeError::Conflict {
                    typ: canonical.clone(),
                    existing: existing.clone(),
                });
            }
        }

        for id in prototypes {
            self.prototypes.insert(id, canonical.clone());
        }
        self.insert_entry(&canonical, &aliases);
        Ok(())
    }

    fn insert_entry(&mut self, canonical: &Type, aliases: &[Type]) {
        self.canonical.insert(canonical.clone(), canonical.clone());
        let known = self.aliases.entry(canonical.clone()).or_default();
        for alias in aliases {
            if !known.contains(alias) {
                known.push(alias.clone());
            }
            self.canonical.insert(alias.clone(), canonical.clone());
        }

        for t in std::iter::once(canonical).chain(aliases) {
            if t.is_versioned() {
                self.defaults
                    .entry(t.kind().to_string())
                    .or_insert_with(|| t.clone());
            }
        }
    }
}
