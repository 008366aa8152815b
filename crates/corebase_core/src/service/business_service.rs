//! Application-facing coordination point over one unit of work.
//!
//! # Responsibility
//! - Decide who owns the unit of work: the service (created privately) or
//!   the caller (supplied externally, possibly shared by several services).
//! - Hand out repositories and transaction control to consuming logic.
//!
//! # Invariants
//! - An external unit of work is never disposed by the service.
//! - A privately owned unit of work is disposed exactly once.
//! - After `dispose` every accessor fails with `InvalidState`.

use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::repository::Repository;
use crate::repo::unit_of_work::UnitOfWork;
use crate::store::{EntityStore, StoreSession};
use log::{info, warn};

enum UnitOfWorkSlot<'a, C: StoreSession> {
    Owned(UnitOfWork<C>),
    External(&'a UnitOfWork<C>),
}

impl<C: StoreSession> UnitOfWorkSlot<'_, C> {
    fn get(&self) -> &UnitOfWork<C> {
        match self {
            Self::Owned(uow) => uow,
            Self::External(uow) => *uow,
        }
    }
}

/// Base service that consuming services compose to reach the store.
pub struct BusinessService<'a, C: StoreSession> {
    slot: Option<UnitOfWorkSlot<'a, C>>,
    is_external: bool,
}

impl<'a, C: StoreSession> BusinessService<'a, C> {
    /// Creates a service owning a fresh unit of work on `store`.
    pub fn new<S>(store: &S) -> RepoResult<Self>
    where
        S: EntityStore<Session = C>,
    {
        Ok(Self::owning(UnitOfWork::new(store)?))
    }

    /// Creates a service that takes ownership of `unit_of_work`.
    pub fn owning(unit_of_work: UnitOfWork<C>) -> Self {
        Self {
            slot: Some(UnitOfWorkSlot::Owned(unit_of_work)),
            is_external: false,
        }
    }

    /// Creates a service borrowing a caller-owned unit of work.
    ///
    /// # Errors
    /// - `Argument` when `unit_of_work` is already disposed.
    pub fn with_unit_of_work(unit_of_work: &'a UnitOfWork<C>) -> RepoResult<Self> {
        if unit_of_work.is_disposed() {
            return Err(RepoError::Argument(
                "external unit of work has already been disposed".to_string(),
            ));
        }

        Ok(Self {
            slot: Some(UnitOfWorkSlot::External(unit_of_work)),
            is_external: true,
        })
    }

    pub fn is_in_external_unit_of_work(&self) -> bool {
        self.is_external
    }

    pub fn is_disposed(&self) -> bool {
        self.slot.is_none()
    }

    /// Unit of work for repository acquisition and transaction control.
    pub fn unit_of_work(&self) -> RepoResult<&UnitOfWork<C>> {
        let uow = self
            .slot
            .as_ref()
            .map(UnitOfWorkSlot::get)
            .ok_or_else(|| RepoError::invalid_state("business service has been disposed"))?;
        if uow.is_disposed() {
            return Err(RepoError::invalid_state("unit of work has been disposed"));
        }
        Ok(uow)
    }

    pub fn repository<E: Entity>(&self) -> RepoResult<Repository<'_, C, E>> {
        Ok(self.unit_of_work()?.repository())
    }

    /// Runs `work` inside a new transaction.
    ///
    /// Commits when `work` succeeds. When `work` or the commit fails the
    /// transaction is rolled back and that first error is returned; a
    /// rollback failure is logged and does not replace it.
    pub fn run_in_transaction<T, F>(&self, work: F) -> RepoResult<T>
    where
        F: FnOnce(&UnitOfWork<C>) -> RepoResult<T>,
    {
        let uow = self.unit_of_work()?;
        uow.create_transaction()?;

        let result = work(uow).and_then(|value| uow.commit().map(|()| value));
        if result.is_err() && uow.has_open_transaction() {
            if let Err(rollback_err) = uow.rollback() {
                warn!(
                    "event=service_tx module=service status=warn error_code=rollback_failed error={rollback_err}"
                );
            }
        }
        result
    }

    /// Releases the service. Disposes the unit of work only when owned.
    ///
    /// Calling it again is a no-op.
    pub fn dispose(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        match slot {
            UnitOfWorkSlot::Owned(uow) => {
                uow.dispose();
                info!("event=service_dispose module=service status=ok ownership=owned");
            }
            UnitOfWorkSlot::External(_) => {
                info!("event=service_dispose module=service status=ok ownership=external");
            }
        }
    }
}

impl<C: StoreSession> Drop for BusinessService<'_, C> {
    fn drop(&mut self) {
        self.dispose();
    }
}
