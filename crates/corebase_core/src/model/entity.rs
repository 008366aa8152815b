//! Entity trait consumed by repositories and the store.
//!
//! # Responsibility
//! - Bind a Rust type to its collection name and primary key.
//! - Expose store-level shape/constraint checks through `validate()`.
//!
//! # Invariants
//! - `id()` is stable for the lifetime of a persisted entity.
//! - `COLLECTION` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).

use crate::model::validation::ValidationErrorSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;

/// A domain record persisted in one collection of the entity store.
pub trait Entity: Clone + Serialize + DeserializeOwned {
    /// Primary key type. Rendered with `Display` to build the storage key.
    type Id: Display + Clone;

    /// Collection name this entity type is stored under.
    const COLLECTION: &'static str;

    /// Returns the primary key.
    fn id(&self) -> Self::Id;

    /// Returns every constraint this value violates.
    ///
    /// An empty set means the entity may be staged.
    fn validate(&self) -> ValidationErrorSet {
        ValidationErrorSet::new()
    }
}

/// Renders a primary key into the storage key text.
pub fn storage_key<E: Entity>(id: &E::Id) -> String {
    id.to_string()
}
