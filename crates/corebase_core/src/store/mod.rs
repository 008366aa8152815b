//! Entity store contract and its SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow interface a store context must satisfy: open a
//!   session, begin/commit/rollback, stage changes, flush, read a collection.
//! - Keep SQL and serialization details behind that interface.
//!
//! # Invariants
//! - A session holds at most one open transaction.
//! - Staged changes become durable only through `save_changes` followed by
//!   a commit (or an implicit commit when no transaction is open).
//! - Sessions are single-threaded; they use interior mutability, not locks.

use crate::db::DbError;
use crate::model::entity::Entity;
use crate::model::validation::ValidationErrorSet;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

mod sqlite;
mod tracker;

pub use sqlite::{SqliteSession, SqliteStore};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure raised by a store session.
#[derive(Debug)]
pub enum StoreError {
    /// The entity shape or a store constraint was rejected.
    Validation(ValidationErrorSet),
    /// A staged update/delete targeted a row that does not exist.
    MissingRow { collection: String, key: String },
    InvalidCollection(String),
    Db(DbError),
    Codec(serde_json::Error),
    /// The session was closed.
    Closed,
    /// The session is borrowed by a running read and cannot be closed.
    Busy,
    Cancelled,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => write!(f, "validation failed:\n{errors}"),
            Self::MissingRow { collection, key } => {
                write!(f, "no row with key `{key}` in collection `{collection}`")
            }
            Self::InvalidCollection(name) => write!(f, "invalid collection name `{name}`"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "entity encoding failed: {err}"),
            Self::Closed => write!(f, "store session is closed"),
            Self::Busy => write!(f, "store session is in use"),
            Self::Cancelled => write!(f, "store read was cancelled"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(errors) => Some(errors),
            Self::Db(err) => Some(err),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<ValidationErrorSet> for StoreError {
    fn from(value: ValidationErrorSet) -> Self {
        Self::Validation(value)
    }
}

/// Construction parameters for a store. Parsing them is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` gives every session its own in-memory database.
    pub path: Option<PathBuf>,
    /// How long a session waits on a locked database file.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Shared cancellation signal for long reads.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Resolved, validated reference to one entity collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionHandle {
    name: &'static str,
}

impl CollectionHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Factory for store sessions.
pub trait EntityStore {
    type Session: StoreSession;

    fn open_session(&self) -> StoreResult<Self::Session>;
}

/// One live connection to the store.
///
/// Methods take `&self`; a session is a single-threaded resource and must
/// not be shared across concurrent operations.
pub trait StoreSession {
    /// Identity used to correlate log lines.
    fn session_id(&self) -> Uuid;
    fn is_open(&self) -> bool;
    /// Releases the connection. Staged changes are dropped; an open
    /// transaction is rolled back by the engine.
    fn close(&self) -> StoreResult<()>;

    fn begin_transaction(&self) -> StoreResult<()>;
    fn commit_transaction(&self) -> StoreResult<()>;
    fn rollback_transaction(&self) -> StoreResult<()>;
    fn in_transaction(&self) -> bool;

    /// Flushes every staged change in one atomic step and returns the row count.
    ///
    /// On failure nothing is written and the staged changes stay staged.
    fn save_changes(&self) -> StoreResult<usize>;
    fn discard_changes(&self);
    fn pending_changes(&self) -> usize;
    fn auto_detect_changes(&self) -> bool;
    /// When disabled, `add`/`add_range` skip key tracking and duplicate checks.
    fn set_auto_detect_changes(&self, enabled: bool);

    fn resolve_collection(&self, name: &'static str) -> StoreResult<CollectionHandle>;
    fn add<E: Entity>(&self, collection: &CollectionHandle, entity: &E) -> StoreResult<()>;
    /// Stages every entity or none of them.
    fn add_range<E: Entity>(&self, collection: &CollectionHandle, entities: &[E])
        -> StoreResult<()>;
    fn mark_modified<E: Entity>(&self, collection: &CollectionHandle, entity: &E)
        -> StoreResult<()>;
    fn remove<E: Entity>(&self, collection: &CollectionHandle, entity: &E) -> StoreResult<()>;
    /// Drops every staged insert that bypassed key tracking.
    fn detach_untracked(&self);

    /// Key lookup; staged changes win over stored rows.
    fn find<E: Entity>(&self, collection: &CollectionHandle, id: &E::Id)
        -> StoreResult<Option<E>>;
    /// Every stored row of the collection, in insertion order.
    fn to_list<E: Entity>(&self, collection: &CollectionHandle) -> StoreResult<Vec<E>>;
    fn to_list_cancellable<E: Entity>(
        &self,
        collection: &CollectionHandle,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<E>>;
    /// Streams stored rows through `predicate`; only matches are kept.
    fn find_where<E, P>(&self, collection: &CollectionHandle, predicate: P) -> StoreResult<Vec<E>>
    where
        E: Entity,
        P: FnMut(&E) -> bool;
}

pub(crate) fn is_valid_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
