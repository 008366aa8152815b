//! Change tracker for staged writes of one session.
//!
//! # Invariants
//! - At most one tracked entry per `(collection, key)`.
//! - Flush order equals staging order.

use crate::model::validation::ValidationErrorSet;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Added,
    Modified,
    /// Deleted then added again; the row may or may not be stored.
    Replaced,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TrackKey {
    pub collection: &'static str,
    pub key: String,
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    seq: u64,
    state: EntryState,
    body: Option<String>,
}

/// One write to apply during a flush.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub target: TrackKey,
    pub state: EntryState,
    pub body: Option<String>,
}

/// Result of a key lookup against staged state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Staged<'a> {
    Present(&'a str),
    Removed,
    Untracked,
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    next_seq: u64,
    entries: HashMap<TrackKey, TrackedEntry>,
    untracked: Vec<(u64, TrackKey, String)>,
}

impl ChangeTracker {
    pub fn stage_add(&mut self, target: TrackKey, body: String) -> Result<(), ValidationErrorSet> {
        let seq = self.bump();
        match self.entries.get_mut(&target) {
            None => {
                self.entries.insert(
                    target,
                    TrackedEntry {
                        seq,
                        state: EntryState::Added,
                        body: Some(body),
                    },
                );
                Ok(())
            }
            Some(entry) if entry.state == EntryState::Deleted => {
                entry.seq = seq;
                entry.state = EntryState::Replaced;
                entry.body = Some(body);
                Ok(())
            }
            Some(_) => Err(ValidationErrorSet::single(
                "id",
                format!(
                    "an entity with key `{}` is already tracked in collection `{}`",
                    target.key, target.collection
                ),
            )),
        }
    }

    /// Stages an insert without key tracking; duplicates surface at flush.
    pub fn stage_untracked_add(&mut self, target: TrackKey, body: String) {
        let seq = self.bump();
        self.untracked.push((seq, target, body));
    }

    pub fn stage_modified(&mut self, target: TrackKey, body: String) {
        let seq = self.bump();
        match self.entries.get_mut(&target) {
            // Still an insert or replacement from the store's point of view.
            Some(entry) if matches!(entry.state, EntryState::Added | EntryState::Replaced) => {
                entry.body = Some(body);
            }
            Some(entry) => {
                entry.seq = seq;
                entry.state = EntryState::Modified;
                entry.body = Some(body);
            }
            None => {
                self.entries.insert(
                    target,
                    TrackedEntry {
                        seq,
                        state: EntryState::Modified,
                        body: Some(body),
                    },
                );
            }
        }
    }

    pub fn stage_deleted(&mut self, target: TrackKey) {
        let seq = self.bump();
        match self.entries.get(&target).map(|entry| entry.state) {
            Some(EntryState::Added) => {
                self.entries.remove(&target);
            }
            Some(EntryState::Deleted) => {}
            _ => {
                self.entries.insert(
                    target,
                    TrackedEntry {
                        seq,
                        state: EntryState::Deleted,
                        body: None,
                    },
                );
            }
        }
    }

    pub fn lookup(&self, target: &TrackKey) -> Staged<'_> {
        match self.entries.get(target) {
            Some(TrackedEntry {
                state: EntryState::Deleted,
                ..
            }) => Staged::Removed,
            Some(TrackedEntry {
                body: Some(body), ..
            }) => Staged::Present(body.as_str()),
            _ => Staged::Untracked,
        }
    }

    /// Snapshot of all staged writes in staging order.
    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        let mut ordered: Vec<(u64, PendingWrite)> = self
            .entries
            .iter()
            .map(|(target, entry)| {
                (
                    entry.seq,
                    PendingWrite {
                        target: target.clone(),
                        state: entry.state,
                        body: entry.body.clone(),
                    },
                )
            })
            .chain(self.untracked.iter().map(|(seq, target, body)| {
                (
                    *seq,
                    PendingWrite {
                        target: target.clone(),
                        state: EntryState::Added,
                        body: Some(body.clone()),
                    },
                )
            }))
            .collect();
        ordered.sort_by_key(|(seq, _)| *seq);
        ordered.into_iter().map(|(_, write)| write).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.untracked.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.untracked.clear();
    }

    pub fn clear_untracked(&mut self) {
        self.untracked.clear();
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}
