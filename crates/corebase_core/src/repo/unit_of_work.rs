//! Unit of work: one store session and its transaction boundary.
//!
//! # Responsibility
//! - Own the session lifetime; release it exactly once.
//! - Enforce the transaction state machine `Idle -> Open -> Idle`.
//! - Flush staged repository changes on `save` and `commit`.
//!
//! # Invariants
//! - At most one open transaction; no nesting.
//! - `commit`/`rollback` require an open transaction.
//! - After `dispose` every operation fails with `InvalidState`.
//! - Teardown failures are logged, never returned.

use crate::model::entity::Entity;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::repository::Repository;
use crate::store::{EntityStore, StoreSession};
use log::{info, warn};
use std::cell::Cell;

/// Transaction state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Open,
}

pub struct UnitOfWork<C: StoreSession> {
    session: C,
    state: Cell<TransactionState>,
    disposed: Cell<bool>,
}

impl<C: StoreSession> UnitOfWork<C> {
    /// Opens a fresh session on `store` and takes ownership of it.
    pub fn new<S>(store: &S) -> RepoResult<Self>
    where
        S: EntityStore<Session = C>,
    {
        let session = store.open_session()?;
        Ok(Self::from_session(session))
    }

    /// Takes ownership of an already opened session.
    pub fn from_session(session: C) -> Self {
        info!(
            "event=uow_open module=repo status=ok session_id={}",
            session.session_id()
        );
        Self {
            session,
            state: Cell::new(TransactionState::Idle),
            disposed: Cell::new(false),
        }
    }

    /// Returns the session, or `InvalidState` once disposed.
    pub fn session(&self) -> RepoResult<&C> {
        if self.disposed.get() {
            return Err(RepoError::invalid_state("unit of work has been disposed"));
        }
        Ok(&self.session)
    }

    /// Creates a repository scoped to this unit of work's session.
    pub fn repository<E: Entity>(&self) -> Repository<'_, C, E> {
        Repository::new(self)
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.state.get()
    }

    pub fn has_open_transaction(&self) -> bool {
        self.state.get() == TransactionState::Open
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Number of staged changes not yet flushed.
    pub fn pending_changes(&self) -> RepoResult<usize> {
        Ok(self.session()?.pending_changes())
    }

    pub fn create_transaction(&self) -> RepoResult<()> {
        let session = self.session()?;
        if self.has_open_transaction() {
            return Err(RepoError::invalid_state(
                "a transaction is already open on this unit of work",
            ));
        }

        session.begin_transaction()?;
        self.state.set(TransactionState::Open);
        info!(
            "event=uow_tx_begin module=repo status=ok session_id={}",
            session.session_id()
        );
        Ok(())
    }

    /// Flushes staged changes, then commits the open transaction.
    ///
    /// Validation and not-found failures from the flush leave the
    /// transaction open so the caller can correct input or roll back.
    /// Any other store failure is fatal: the transaction is rolled back
    /// best-effort and the error is returned as `FatalStore`.
    pub fn commit(&self) -> RepoResult<()> {
        let session = self.session()?;
        self.require_open("commit")?;

        if let Err(err) = session.save_changes() {
            let err = RepoError::from(err);
            if err.is_recoverable() {
                return Err(err);
            }
            self.abandon_transaction("flush_failed");
            return Err(fatal(err));
        }

        if let Err(err) = session.commit_transaction() {
            self.abandon_transaction("commit_failed");
            return Err(RepoError::FatalStore(err));
        }

        self.state.set(TransactionState::Idle);
        info!(
            "event=uow_tx_commit module=repo status=ok session_id={}",
            session.session_id()
        );
        Ok(())
    }

    /// Rolls back the open transaction and discards staged changes.
    ///
    /// The unit of work is `Idle` afterwards even when the store fails.
    pub fn rollback(&self) -> RepoResult<()> {
        let session = self.session()?;
        self.require_open("roll back")?;

        self.state.set(TransactionState::Idle);
        session.rollback_transaction()?;
        info!(
            "event=uow_tx_rollback module=repo status=ok session_id={}",
            session.session_id()
        );
        Ok(())
    }

    /// Flushes staged changes without finalizing the transaction.
    ///
    /// Outside a transaction the flush is committed on its own.
    pub fn save(&self) -> RepoResult<usize> {
        let session = self.session()?;
        let rows = session.save_changes()?;
        info!(
            "event=uow_save module=repo status=ok session_id={} rows={} in_transaction={}",
            session.session_id(),
            rows,
            self.has_open_transaction()
        );
        Ok(rows)
    }

    /// Releases the session. A second call is a no-op.
    ///
    /// An open transaction is rolled back first. Failures are logged only.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }

        let session_id = self.session.session_id();
        if self.has_open_transaction() {
            self.state.set(TransactionState::Idle);
            if let Err(err) = self.session.rollback_transaction() {
                warn!(
                    "event=uow_dispose module=repo status=warn session_id={session_id} error_code=rollback_failed error={err}"
                );
            }
        }

        match self.session.close() {
            Ok(()) => info!("event=uow_dispose module=repo status=ok session_id={session_id}"),
            Err(err) => warn!(
                "event=uow_dispose module=repo status=warn session_id={session_id} error_code=close_failed error={err}"
            ),
        }
    }

    fn require_open(&self, action: &str) -> RepoResult<()> {
        if self.has_open_transaction() {
            Ok(())
        } else {
            Err(RepoError::invalid_state(format!(
                "cannot {action}: no transaction is open"
            )))
        }
    }

    fn abandon_transaction(&self, reason: &str) {
        self.state.set(TransactionState::Idle);
        let session_id = self.session.session_id();
        warn!(
            "event=uow_tx_commit module=repo status=error session_id={session_id} error_code={reason}"
        );
        if self.session.in_transaction() {
            if let Err(err) = self.session.rollback_transaction() {
                warn!(
                    "event=uow_tx_rollback module=repo status=warn session_id={session_id} error_code=rollback_failed error={err}"
                );
            }
        } else {
            self.session.discard_changes();
        }
    }
}

impl<C: StoreSession> Drop for UnitOfWork<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn fatal(err: RepoError) -> RepoError {
    match err {
        RepoError::Store(inner) => RepoError::FatalStore(inner),
        other => other,
    }
}

impl<C: StoreSession> std::fmt::Debug for UnitOfWork<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("session_id", &self.session.session_id())
            .field("state", &self.state.get())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

