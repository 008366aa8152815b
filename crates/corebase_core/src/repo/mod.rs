//! Data access layer: generic repositories and the unit of work they share.
//!
//! # Responsibility
//! - Offer typed CRUD and bulk operations over one entity collection.
//! - Own a store session and its transaction boundary.
//!
//! # Invariants
//! - A repository never outlives the unit of work it was created from.
//! - Store failures surface through the `RepoError` taxonomy only.

pub mod error;
pub mod repository;
pub mod unit_of_work;
