//! SQLite-backed entity store.
//!
//! # Responsibility
//! - Map collections onto rows of the `entities` table as JSON documents.
//! - Flush staged changes atomically through a savepoint.
//!
//! # Invariants
//! - One `Connection` per session; closing the session drops it.
//! - A failed flush rolls back to the savepoint and keeps the staged state.
//! - Unique-key violations are reported as validation errors, all of them.

use super::tracker::{ChangeTracker, EntryState, PendingWrite, Staged, TrackKey};
use super::{
    is_valid_collection_name, CancelToken, CollectionHandle, EntityStore, StoreConfig,
    StoreError, StoreResult, StoreSession,
};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::entity::{storage_key, Entity};
use crate::model::validation::ValidationErrorSet;
use log::{debug, warn};
use rusqlite::{params, Connection};
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use uuid::Uuid;

const SAVEPOINT: &str = "corebase_save";

/// Store factory over one SQLite database (or private in-memory ones).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    config: StoreConfig,
}

impl SqliteStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Every session opened from this store gets its own empty database.
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl EntityStore for SqliteStore {
    type Session = SqliteSession;

    fn open_session(&self) -> StoreResult<SqliteSession> {
        let conn = match self.config.path.as_ref() {
            Some(path) => open_db(path, Duration::from_millis(self.config.busy_timeout_ms))?,
            None => open_db_in_memory()?,
        };
        Ok(SqliteSession::new(conn))
    }
}

/// One SQLite connection plus the changes staged against it.
pub struct SqliteSession {
    id: Uuid,
    conn: RefCell<Option<Connection>>,
    tracker: RefCell<ChangeTracker>,
    auto_detect_changes: Cell<bool>,
}

impl SqliteSession {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            id: Uuid::new_v4(),
            conn: RefCell::new(Some(conn)),
            tracker: RefCell::new(ChangeTracker::default()),
            auto_detect_changes: Cell::new(true),
        }
    }

    fn conn(&self) -> StoreResult<Ref<'_, Connection>> {
        let guard = self.conn.try_borrow().map_err(|_| StoreError::Busy)?;
        Ref::filter_map(guard, Option::as_ref).map_err(|_| StoreError::Closed)
    }

    fn encode<E: Entity>(
        &self,
        collection: &CollectionHandle,
        entity: &E,
    ) -> StoreResult<(TrackKey, String)> {
        entity.validate().into_result()?;
        let body = serde_json::to_string(entity)?;
        Ok((track_key::<E>(collection, &entity.id()), body))
    }

    fn scan<E, F>(&self, collection: &CollectionHandle, mut visit: F) -> StoreResult<()>
    where
        E: Entity,
        F: FnMut(E) -> StoreResult<()>,
    {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT body
             FROM entities
             WHERE collection = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([collection.name()])?;
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            visit(serde_json::from_str(&body)?)?;
        }
        Ok(())
    }

    fn flush(&self, conn: &Connection, writes: &[PendingWrite]) -> StoreResult<usize> {
        let mut violations = ValidationErrorSet::new();
        let mut written = 0;

        for write in writes {
            match apply_write(conn, write) {
                Ok(()) => written += 1,
                Err(StoreError::Db(err)) if err.is_constraint_violation() => {
                    violations.push(
                        "id",
                        format!(
                            "duplicate key `{}` in collection `{}`",
                            write.target.key, write.target.collection
                        ),
                    );
                }
                Err(err) => return Err(err),
            }
        }

        violations.into_result()?;
        Ok(written)
    }
}

impl StoreSession for SqliteSession {
    fn session_id(&self) -> Uuid {
        self.id
    }

    fn is_open(&self) -> bool {
        matches!(self.conn.try_borrow().as_deref(), Ok(Some(_)))
    }

    fn close(&self) -> StoreResult<()> {
        let conn = self
            .conn
            .try_borrow_mut()
            .map_err(|_| StoreError::Busy)?
            .take();
        self.tracker.borrow_mut().clear();
        match conn {
            Some(conn) => conn
                .close()
                .map_err(|(_, err)| StoreError::Db(DbError::Sqlite(err))),
            None => Ok(()),
        }
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit_transaction(&self) -> StoreResult<()> {
        self.conn()?.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback_transaction(&self) -> StoreResult<()> {
        let result = self.conn()?.execute_batch("ROLLBACK;");
        self.tracker.borrow_mut().clear();
        result?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.conn().map(|conn| !conn.is_autocommit()).unwrap_or(false)
    }

    fn save_changes(&self) -> StoreResult<usize> {
        let writes = self.tracker.borrow().pending_writes();
        if writes.is_empty() {
            return Ok(0);
        }

        let started_at = Instant::now();
        let conn = self.conn()?;
        conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT};"))?;

        match self.flush(&conn, &writes) {
            Ok(written) => {
                conn.execute_batch(&format!("RELEASE {SAVEPOINT};"))?;
                self.tracker.borrow_mut().clear();
                debug!(
                    "event=store_save module=store status=ok session_id={} rows={} duration_ms={}",
                    self.id,
                    written,
                    started_at.elapsed().as_millis()
                );
                Ok(written)
            }
            Err(err) => {
                if let Err(rollback_err) =
                    conn.execute_batch(&format!("ROLLBACK TO {SAVEPOINT}; RELEASE {SAVEPOINT};"))
                {
                    warn!(
                        "event=store_save module=store status=error session_id={} error_code=savepoint_rollback_failed error={}",
                        self.id, rollback_err
                    );
                }
                debug!(
                    "event=store_save module=store status=error session_id={} rows={} error={}",
                    self.id,
                    writes.len(),
                    err
                );
                Err(err)
            }
        }
    }

    fn discard_changes(&self) {
        self.tracker.borrow_mut().clear();
    }

    fn pending_changes(&self) -> usize {
        self.tracker.borrow().len()
    }

    fn auto_detect_changes(&self) -> bool {
        self.auto_detect_changes.get()
    }

    fn set_auto_detect_changes(&self, enabled: bool) {
        self.auto_detect_changes.set(enabled);
    }

    fn resolve_collection(&self, name: &'static str) -> StoreResult<CollectionHandle> {
        self.conn()?;
        if !is_valid_collection_name(name) {
            return Err(StoreError::InvalidCollection(name.to_string()));
        }
        Ok(CollectionHandle { name })
    }

    fn add<E: Entity>(&self, collection: &CollectionHandle, entity: &E) -> StoreResult<()> {
        self.conn()?;
        let (target, body) = self.encode(collection, entity)?;
        let mut tracker = self.tracker.borrow_mut();
        if self.auto_detect_changes.get() {
            tracker.stage_add(target, body)?;
        } else {
            tracker.stage_untracked_add(target, body);
        }
        Ok(())
    }

    fn add_range<E: Entity>(
        &self,
        collection: &CollectionHandle,
        entities: &[E],
    ) -> StoreResult<()> {
        self.conn()?;
        let mut violations = ValidationErrorSet::new();
        let mut encoded = Vec::with_capacity(entities.len());
        for (index, entity) in entities.iter().enumerate() {
            match self.encode(collection, entity) {
                Ok(pair) => encoded.push(pair),
                Err(StoreError::Validation(errors)) => {
                    violations.extend_prefixed(&format!("[{index}]"), errors);
                }
                Err(err) => return Err(err),
            }
        }
        violations.into_result()?;

        let mut tracker = self.tracker.borrow_mut();
        if self.auto_detect_changes.get() {
            // Validate against the tracker first so a duplicate stages nothing.
            let mut probe = ValidationErrorSet::new();
            let mut seen = HashSet::new();
            for (target, _) in &encoded {
                let tracked = matches!(tracker.lookup(target), Staged::Present(_));
                if !seen.insert(target) || tracked {
                    probe.push(
                        "id",
                        format!(
                            "an entity with key `{}` is already tracked in collection `{}`",
                            target.key, target.collection
                        ),
                    );
                }
            }
            probe.into_result()?;
            for (target, body) in encoded {
                tracker.stage_add(target, body)?;
            }
        } else {
            for (target, body) in encoded {
                tracker.stage_untracked_add(target, body);
            }
        }
        Ok(())
    }

    fn mark_modified<E: Entity>(
        &self,
        collection: &CollectionHandle,
        entity: &E,
    ) -> StoreResult<()> {
        self.conn()?;
        let (target, body) = self.encode(collection, entity)?;
        self.tracker.borrow_mut().stage_modified(target, body);
        Ok(())
    }

    fn remove<E: Entity>(&self, collection: &CollectionHandle, entity: &E) -> StoreResult<()> {
        self.conn()?;
        self.tracker
            .borrow_mut()
            .stage_deleted(track_key::<E>(collection, &entity.id()));
        Ok(())
    }

    fn detach_untracked(&self) {
        self.tracker.borrow_mut().clear_untracked();
    }

    fn find<E: Entity>(
        &self,
        collection: &CollectionHandle,
        id: &E::Id,
    ) -> StoreResult<Option<E>> {
        let conn = self.conn()?;
        let target = track_key::<E>(collection, id);
        {
            let tracker = self.tracker.borrow();
            match tracker.lookup(&target) {
                Staged::Present(body) => return Ok(Some(serde_json::from_str(body)?)),
                Staged::Removed => return Ok(None),
                Staged::Untracked => {}
            }
        }

        let mut stmt = conn.prepare_cached(
            "SELECT body
             FROM entities
             WHERE collection = ?1
               AND entity_key = ?2;",
        )?;
        let mut rows = stmt.query(params![target.collection, target.key])?;
        if let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            return Ok(Some(serde_json::from_str(&body)?));
        }

        Ok(None)
    }

    fn to_list<E: Entity>(&self, collection: &CollectionHandle) -> StoreResult<Vec<E>> {
        let mut entities = Vec::new();
        self.scan(collection, |entity: E| {
            entities.push(entity);
            Ok(())
        })?;
        Ok(entities)
    }

    fn to_list_cancellable<E: Entity>(
        &self,
        collection: &CollectionHandle,
        cancel: &CancelToken,
    ) -> StoreResult<Vec<E>> {
        cancel.check()?;
        let mut entities = Vec::new();
        self.scan(collection, |entity: E| {
            cancel.check()?;
            entities.push(entity);
            Ok(())
        })?;
        Ok(entities)
    }

    fn find_where<E, P>(&self, collection: &CollectionHandle, mut predicate: P) -> StoreResult<Vec<E>>
    where
        E: Entity,
        P: FnMut(&E) -> bool,
    {
        let mut matches = Vec::new();
        self.scan(collection, |entity: E| {
            if predicate(&entity) {
                matches.push(entity);
            }
            Ok(())
        })?;
        Ok(matches)
    }
}

fn track_key<E: Entity>(collection: &CollectionHandle, id: &E::Id) -> TrackKey {
    TrackKey {
        collection: collection.name(),
        key: storage_key::<E>(id),
    }
}

fn apply_write(conn: &Connection, write: &PendingWrite) -> StoreResult<()> {
    let collection = write.target.collection;
    let key = write.target.key.as_str();
    let changed = match write.state {
        EntryState::Added => conn
            .prepare_cached(
                "INSERT INTO entities (collection, entity_key, body)
                 VALUES (?1, ?2, ?3);",
            )?
            .execute(params![collection, key, write.body.as_deref()])?,
        EntryState::Modified => conn
            .prepare_cached(
                "UPDATE entities
                 SET
                    body = ?3,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE collection = ?1
                   AND entity_key = ?2;",
            )?
            .execute(params![collection, key, write.body.as_deref()])?,
        EntryState::Replaced => conn
            .prepare_cached(
                "INSERT INTO entities (collection, entity_key, body)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (collection, entity_key) DO UPDATE
                 SET
                    body = excluded.body,
                    updated_at = (strftime('%s', 'now') * 1000);",
            )?
            .execute(params![collection, key, write.body.as_deref()])?,
        EntryState::Deleted => conn
            .prepare_cached(
                "DELETE FROM entities
                 WHERE collection = ?1
                   AND entity_key = ?2;",
            )?
            .execute(params![collection, key])?,
    };

    if changed == 0 {
        return Err(StoreError::MissingRow {
            collection: collection.to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}
