//! Single-writer ingestion session for concurrent grounding producers.
//!
//! Appending a term and updating the union-find partition is one critical
//! section: union-find merges are not individually safe under concurrent
//! mutators. The session owns the exclusive borrows of the term store and
//! the atom store for the grounding phase; `finish` ends the phase and seals
//! the store so reasoners can read it.

use std::sync::Mutex;

use crate::atom::AtomStore;
use crate::term::Term;

use super::{MemTermStore, StoreResult, TermId, illegal_state};

struct Target<'a, A: ?Sized> {
    store: &'a mut MemTermStore,
    atoms: &'a mut A,
}

/// Shared handle grounding threads call `add` on.
pub struct ConcurrentGrounder<'a, A: AtomStore + Send + ?Sized> {
    target: Mutex<Target<'a, A>>,
}

impl<'a, A: AtomStore + Send + ?Sized> ConcurrentGrounder<'a, A> {
    /// Open a session. The store must be in its grounding phase.
    pub fn new(store: &'a mut MemTermStore, atoms: &'a mut A) -> StoreResult<Self> {
        if store.phase() != super::StorePhase::Grounding {
            return Err(illegal_state(format!(
                "cannot start grounding on a {} store",
                store.phase()
            )));
        }
        Ok(Self {
            target: Mutex::new(Target { store, atoms }),
        })
    }

    /// Append one term under the session lock.
    pub fn add(&self, term: Term) -> StoreResult<TermId> {
        let mut guard = self
            .target
            .lock()
            .map_err(|_| illegal_state("grounding lock poisoned by a panicking producer"))?;
        let Target { store, atoms } = &mut *guard;
        store.add(term, &mut **atoms)
    }

    /// Append a batch of terms while holding the lock once.
    pub fn add_all<I: IntoIterator<Item = Term>>(&self, terms: I) -> StoreResult<usize> {
        let mut guard = self
            .target
            .lock()
            .map_err(|_| illegal_state("grounding lock poisoned by a panicking producer"))?;
        let Target { store, atoms } = &mut *guard;
        let mut added = 0;
        for term in terms {
            store.add(term, &mut **atoms)?;
            added += 1;
        }
        Ok(added)
    }

    /// End the grounding phase: seal the store and release both borrows.
    pub fn finish(self) -> StoreResult<usize> {
        let target = self
            .target
            .into_inner()
            .map_err(|_| illegal_state("grounding lock poisoned by a panicking producer"))?;
        target.store.seal()?;
        tracing::info!(
            terms = target.store.len(),
            components = target.store.components().len(),
            "grounding finished"
        );
        Ok(target.store.len())
    }
}
