//! Generic repository over one entity collection.
//!
//! # Responsibility
//! - Typed CRUD, predicate search and bulk writes for one entity type.
//! - Stage single writes in the session; the unit of work flushes them.
//!
//! # Invariants
//! - `get_by_id` reports "not found" as `Ok(None)`, never as an error.
//! - `delete_by_id` fails with `NotFound` and stages nothing when absent.
//! - `bulk_insert` flushes immediately instead of waiting for
//!   `UnitOfWork::save`. It also flushes whatever else is staged in the
//!   session at that moment. Inside an open transaction the flush is still
//!   undone by a rollback; outside one it is durable at once.

use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::unit_of_work::UnitOfWork;
use crate::store::{CancelToken, CollectionHandle, StoreSession};
use log::{info, warn};
use once_cell::unsync::OnceCell;
use std::marker::PhantomData;
use std::time::Instant;

/// Typed view over one collection of the unit of work's session.
pub struct Repository<'uow, C: StoreSession, E: Entity> {
    uow: &'uow UnitOfWork<C>,
    collection: OnceCell<CollectionHandle>,
    _entity: PhantomData<fn() -> E>,
}

impl<'uow, C: StoreSession, E: Entity> Repository<'uow, C, E> {
    pub fn new(uow: &'uow UnitOfWork<C>) -> Self {
        Self {
            uow,
            collection: OnceCell::new(),
            _entity: PhantomData,
        }
    }

    /// Returns every stored entity in store order.
    ///
    /// Reads flushed state; staged inserts are not included.
    pub fn get_all(&self) -> RepoResult<Vec<E>> {
        let (session, collection) = self.resolve()?;
        Ok(session.to_list::<E>(&collection)?)
    }

    /// Like `get_all`, but stops with `Cancelled` once `cancel` fires.
    pub fn get_all_cancellable(&self, cancel: &CancelToken) -> RepoResult<Vec<E>> {
        let (session, collection) = self.resolve()?;
        Ok(session.to_list_cancellable::<E>(&collection, cancel)?)
    }

    /// Looks up one entity by primary key, staged changes included.
    pub fn get_by_id(&self, id: &E::Id) -> RepoResult<Option<E>> {
        let (session, collection) = self.resolve()?;
        Ok(session.find::<E>(&collection, id)?)
    }

    /// Returns stored entities matching `predicate`.
    ///
    /// Rows are decoded and tested one at a time; only matches are kept.
    pub fn find<P>(&self, predicate: P) -> RepoResult<Vec<E>>
    where
        P: FnMut(&E) -> bool,
    {
        let (session, collection) = self.resolve()?;
        Ok(session.find_where::<E, P>(&collection, predicate)?)
    }

    /// Stages `entity` for creation.
    pub fn insert(&self, entity: &E) -> RepoResult<()> {
        let (session, collection) = self.resolve()?;
        session.add(&collection, entity)?;
        Ok(())
    }

    /// Stages a full overwrite of an existing entity.
    ///
    /// A missing row is reported as `NotFound` when the change is flushed.
    pub fn update(&self, entity: &E) -> RepoResult<()> {
        let (session, collection) = self.resolve()?;
        session.mark_modified(&collection, entity)?;
        Ok(())
    }

    pub fn delete(&self, entity: &E) -> RepoResult<()> {
        let (session, collection) = self.resolve()?;
        session.remove(&collection, entity)?;
        Ok(())
    }

    pub fn delete_by_id(&self, id: &E::Id) -> RepoResult<()> {
        match self.get_by_id(id)? {
            Some(entity) => self.delete(&entity),
            None => Err(RepoError::NotFound {
                collection: E::COLLECTION.to_string(),
                id: id.to_string(),
            }),
        }
    }

    /// Stages all `entities` without key tracking and flushes the session.
    ///
    /// Either every entity is written or none is; validation failures of
    /// all entities come back as one error with fields prefixed `[index]`.
    /// Returns the number of rows written by the flush.
    pub fn bulk_insert(&self, entities: &[E]) -> RepoResult<usize> {
        let (session, collection) = self.resolve()?;
        let started_at = Instant::now();

        let previous = session.auto_detect_changes();
        session.set_auto_detect_changes(false);
        let result = session
            .add_range(&collection, entities)
            .and_then(|()| session.save_changes());
        session.set_auto_detect_changes(previous);

        match result {
            Ok(rows) => {
                info!(
                    "event=repo_bulk_insert module=repo status=ok collection={} entities={} rows={} duration_ms={}",
                    collection.name(),
                    entities.len(),
                    rows,
                    started_at.elapsed().as_millis()
                );
                Ok(rows)
            }
            Err(err) => {
                session.detach_untracked();
                warn!(
                    "event=repo_bulk_insert module=repo status=error collection={} entities={} error={}",
                    collection.name(),
                    entities.len(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Stages a delete for each entity in order.
    ///
    /// Stops at the first failure; deletes staged before it stay staged.
    pub fn bulk_delete(&self, entities: &[E]) -> RepoResult<()> {
        for entity in entities {
            self.delete(entity)?;
        }
        Ok(())
    }

    fn resolve(&self) -> RepoResult<(&'uow C, CollectionHandle)> {
        let session = self.uow.session()?;
        let collection = self
            .collection
            .get_or_try_init(|| session.resolve_collection(E::COLLECTION))?;
        Ok((session, *collection))
    }
}
