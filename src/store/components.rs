//! Connected components of terms, keyed by union-find root atom.
//!
//! Each bucket holds the ids of terms whose free atoms are transitively
//! connected. Buckets are merged incrementally as terms arrive; they never
//! split within a round, so the index is never rebuilt from scratch.

use std::collections::HashMap;

use crate::atom::{AtomId, AtomResult, AtomStore};
use crate::term::Term;

use super::TermId;

/// Partition of term ids into connected components.
///
/// Invariant: every key is the current union-find root of the atoms of the
/// terms in its bucket, and every term id appears in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct ComponentIndex {
    buckets: HashMap<AtomId, Vec<TermId>>,
}

impl ComponentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// File term `id` under its component, merging components its free
    /// atoms connect. Returns the component key the term ended up in.
    ///
    /// Fixed atoms never link components. A term whose atoms are all fixed is
    /// keyed by its first atom.
    pub fn insert<A: AtomStore + ?Sized>(
        &mut self,
        id: TermId,
        term: &Term,
        atoms: &mut A,
    ) -> AtomResult<AtomId> {
        let mut anchor = None;
        for &atom in term.atoms() {
            if !atoms.is_fixed(atom)? {
                anchor = Some(atom);
                break;
            }
        }
        let Some(anchor) = anchor else {
            let root = atoms.find_root(term.atoms()[0])?;
            self.buckets.entry(root).or_default().push(id);
            return Ok(root);
        };

        let mut root = atoms.find_root(anchor)?;
        self.buckets.entry(root).or_default().push(id);

        for &atom in term.atoms() {
            if atoms.is_fixed(atom)? {
                continue;
            }
            let other = atoms.find_root(atom)?;
            if other == root {
                continue;
            }
            let merged = atoms.union(root, other)?;
            self.merge(root, other, merged);
            root = merged;
        }
        Ok(root)
    }

    /// Merge the buckets under `a` and `b` into one keyed by `into`, moving
    /// the smaller bucket's entries into the larger one.
    fn merge(&mut self, a: AtomId, b: AtomId, into: AtomId) {
        let left = self.buckets.remove(&a).unwrap_or_default();
        let right = self.buckets.remove(&b).unwrap_or_default();
        let (mut big, small) = if left.len() >= right.len() {
            (left, right)
        } else {
            (right, left)
        };
        big.extend(small);
        if !big.is_empty() {
            self.buckets.insert(into, big);
        }
    }

    /// Term ids of the component keyed by `root`.
    pub fn get(&self, root: AtomId) -> Option<&[TermId]> {
        self.buckets.get(&root).map(Vec::as_slice)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AtomId, &[TermId])> {
        self.buckets.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn keys(&self) -> Vec<AtomId> {
        self.buckets.keys().copied().collect()
    }

    /// Label-free view of the partition: each component's ids sorted, and
    /// the components sorted by their smallest id.
    pub fn canonical(&self) -> Vec<Vec<TermId>> {
        let mut parts: Vec<Vec<TermId>> = self
            .buckets
            .values()
            .map(|v| {
                let mut v = v.clone();
                v.sort_unstable();
                v
            })
            .collect();
        parts.sort();
        parts
    }

    /// Size of the largest component.
    pub fn largest(&self) -> usize {
        self.buckets.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
