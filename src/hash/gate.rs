// ABOUTME: ChangeGate - the single dedup decision point for outbound synchronization
// ABOUTME: Compares a fresh content hash against the HashStore and records changes

use std::sync::Arc;

use super::canonical::Canonicalizer;
use super::snapshot::EntitySnapshot;
use super::store::{HashRecord, HashStore};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    Changed(String),
}

impl Decision {
    pub fn is_changed(&self) -> bool {
        matches!(self, Decision::Changed(_))
    }
}

/// Decides whether an entity's persisted state has changed since it was last
/// hashed. Callers must not emit a sync event on [`Decision::Unchanged`].
///
/// The lookup and the upsert are not atomic. Two evaluations racing on the
/// same identifier can both report `Changed`, which costs a redundant sync
/// event but never loses a change.
pub struct ChangeGate<S> {
    canonicalizer: Canonicalizer,
    store: Arc<S>,
}

impl<S: HashStore> ChangeGate<S> {
    pub fn new(canonicalizer: Canonicalizer, store: Arc<S>) -> Self {
        Self {
            canonicalizer,
            store,
        }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn evaluate(
        &self,
        entity_type: &str,
        identifier: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<Decision> {
        self.evaluate_tracked(entity_type, identifier, snapshot)
            .map(|(decision, _)| decision)
    }

    /// Like [`ChangeGate::evaluate`], also returning the record that was
    /// replaced so a caller can [`ChangeGate::revert`] when the change could
    /// not be delivered.
    pub fn evaluate_tracked(
        &self,
        entity_type: &str,
        identifier: &str,
        snapshot: &EntitySnapshot,
    ) -> Result<(Decision, Option<HashRecord>)> {
        if snapshot.entity_type() != entity_type {
            return Err(SyncError::Configuration(format!(
                "snapshot of {} cannot be evaluated as {}",
                snapshot.entity_type(),
                entity_type
            )));
        }
        // A snapshot that cannot be hashed fails here, before the store is touched.
        let new_hash = self.canonicalizer.hash(snapshot)?;

        match self.store.lookup(entity_type, identifier)? {
            Some(existing) if existing.hash == new_hash => {
                tracing::debug!(entity_type, identifier, "entity unchanged");
                Ok((Decision::Unchanged, Some(existing)))
            }
            existing => {
                if existing.is_some() {
                    tracing::debug!(entity_type, identifier, hash = %new_hash, "updating hash");
                } else {
                    tracing::debug!(entity_type, identifier, hash = %new_hash, "inserting hash");
                }
                self.store.upsert(entity_type, identifier, &new_hash)?;
                Ok((Decision::Changed(new_hash), existing))
            }
        }
    }

    /// Undo a `Changed` decision: the next evaluation of the same state
    /// reports `Changed` again.
    pub fn revert(
        &self,
        entity_type: &str,
        identifier: &str,
        previous: Option<&HashRecord>,
    ) -> Result<()> {
        tracing::debug!(entity_type, identifier, "reverting stored hash");
        self.store.restore(entity_type, identifier, previous)
    }
}
