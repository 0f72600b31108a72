//! In-memory term store.
//!
//! Terms are appended in grounding order and kept resident; the component
//! index is updated on every `add`. All mutation goes through `&mut self`, so
//! concurrent producers must share the store through a
//! [`ConcurrentGrounder`](super::ConcurrentGrounder).

use std::collections::HashMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::atom::AtomStore;
use crate::rule::RuleId;
use crate::term::{Term, Weight};

use super::{ComponentIndex, StorePhase, StoreResult, TermId, TermStream, illegal_state};
use crate::error::StoreError;

/// Append-only, fully resident collection of potential terms.
#[derive(Debug)]
pub struct MemTermStore {
    terms: Vec<Term>,
    components: ComponentIndex,
    counts: HashMap<RuleId, usize>,
    phase: StorePhase,
}

impl MemTermStore {
    /// Create an empty store in the grounding phase.
    pub fn new() -> Self {
        Self {
            terms: Vec::new(),
            components: ComponentIndex::new(),
            counts: HashMap::new(),
            phase: StorePhase::Grounding,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            terms: Vec::with_capacity(capacity),
            ..Self::new()
        }
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    /// Append a term and fold it into the component index.
    pub fn add<A: AtomStore + ?Sized>(&mut self, term: Term, atoms: &mut A) -> StoreResult<TermId> {
        match self.phase {
            StorePhase::Grounding => {}
            StorePhase::Ready => {
                return Err(illegal_state(
                    "store is sealed for optimization; clear() it to start a new round",
                ));
            }
            StorePhase::Closed => return Err(illegal_state("add on a closed term store")),
        }
        for &atom in term.atoms() {
            atoms.check(atom)?;
        }
        let id = self.terms.len();
        self.components.insert(id, &term, atoms)?;
        *self.counts.entry(term.rule()).or_insert(0) += 1;
        self.terms.push(term);
        Ok(id)
    }

    /// End the grounding phase; terms become readable by reasoners.
    pub fn seal(&mut self) -> StoreResult<()> {
        match self.phase {
            StorePhase::Grounding | StorePhase::Ready => {
                self.phase = StorePhase::Ready;
                tracing::debug!(
                    terms = self.terms.len(),
                    components = self.components.len(),
                    "term store sealed"
                );
                Ok(())
            }
            StorePhase::Closed => Err(illegal_state("seal on a closed term store")),
        }
    }

    /// Fail unless grounding has finished.
    pub fn ensure_ready(&self) -> StoreResult<()> {
        match self.phase {
            StorePhase::Ready => Ok(()),
            StorePhase::Grounding => Err(illegal_state(
                "term store is still grounding; seal() it before optimizing",
            )),
            StorePhase::Closed => Err(illegal_state("term store is closed")),
        }
    }

    /// Drop every term and component and reopen for a new grounding round.
    ///
    /// The caller is responsible for resetting the atom store's partition.
    pub fn clear(&mut self) -> StoreResult<()> {
        if self.phase == StorePhase::Closed {
            return Err(illegal_state("clear on a closed term store"));
        }
        self.terms.clear();
        self.components.clear();
        self.counts.clear();
        self.phase = StorePhase::Grounding;
        Ok(())
    }

    /// Tear the store down. Every later operation fails.
    pub fn close(&mut self) {
        self.terms = Vec::new();
        self.components.clear();
        self.counts.clear();
        self.phase = StorePhase::Closed;
    }

    pub fn get(&self, index: TermId) -> StoreResult<&Term> {
        if self.phase == StorePhase::Closed {
            return Err(illegal_state("get on a closed term store"));
        }
        self.terms.get(index).ok_or(StoreError::TermOutOfRange {
            index,
            len: self.terms.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// All terms in insertion order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Term> {
        self.terms.iter()
    }

    pub fn components(&self) -> &ComponentIndex {
        &self.components
    }

    /// Number of terms grounded from each rule.
    pub fn grounding_counts(&self) -> &HashMap<RuleId, usize> {
        &self.counts
    }

    /// Re-weight every term of `rule`. Only legal between optimization runs.
    pub fn set_weight(&mut self, rule: RuleId, weight: Weight) -> StoreResult<usize> {
        if self.phase == StorePhase::Closed {
            return Err(illegal_state("set_weight on a closed term store"));
        }
        let weight = weight.validate(rule)?;
        let mut changed = 0;
        for term in self.terms.iter_mut().filter(|t| t.rule() == rule) {
            term.set_weight(weight);
            changed += 1;
        }
        Ok(changed)
    }

    /// Replayable sweep over the terms, optionally shuffled each sweep.
    pub fn sweep(&self, shuffle_seed: Option<u64>) -> StoreResult<MemSweep<'_>> {
        self.ensure_ready()?;
        Ok(MemSweep {
            store: self,
            order: (0..self.terms.len()).collect(),
            pos: 0,
            rng: shuffle_seed.map(StdRng::seed_from_u64),
        })
    }
}

impl Default for MemTermStore {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a MemTermStore {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.iter()
    }
}

/// Sweep cursor over a sealed [`MemTermStore`].
#[derive(Debug)]
pub struct MemSweep<'s> {
    store: &'s MemTermStore,
    order: Vec<TermId>,
    pos: usize,
    rng: Option<StdRng>,
}

impl TermStream for MemSweep<'_> {
    fn begin_sweep(&mut self) -> StoreResult<()> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        self.pos = 0;
        Ok(())
    }

    fn next_term(&mut self) -> StoreResult<Option<&Term>> {
        let Some(&id) = self.order.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(&self.store.terms[id]))
    }

    fn num_terms(&self) -> usize {
        self.order.len()
    }
}
