//! Generic persistence core: repositories, units of work and business
//! services over a transactional entity store.
//!
//! The store is reached only through the `EntityStore`/`StoreSession`
//! traits; `SqliteStore` is the bundled implementation.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod store;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::Entity;
pub use model::validation::{FieldError, ValidationErrorSet};
pub use repo::error::{RepoError, RepoResult};
pub use repo::repository::Repository;
pub use repo::unit_of_work::{TransactionState, UnitOfWork};
pub use service::business_service::BusinessService;
pub use store::{
    CancelToken, CollectionHandle, EntityStore, SqliteSession, SqliteStore, StoreConfig,
    StoreError, StoreResult, StoreSession,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
