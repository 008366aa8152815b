//! Entity contract and validation data shared by every persistence layer.
//!
//! # Responsibility
//! - Define what a persistable entity must expose to the store.
//! - Provide the one structured aggregation type for validation failures.
//!
//! # Invariants
//! - Every entity belongs to exactly one named collection.
//! - Validation failures are reported as one ordered set, never piecemeal.

pub mod entity;
pub mod validation;
