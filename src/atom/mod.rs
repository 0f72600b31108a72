//! Ground atoms: truth values, observed flags, and the union-find partition.
//!
//! The atom store is the collaborator the inference core reads and writes
//! atom values through. Terms only ever hold [`AtomId`]s; the store owns the
//! values and the disjoint-set forest that component tracking unions over.

pub mod union_find;

use serde::{Deserialize, Serialize};

use crate::error::AtomError;

pub use union_find::DisjointSet;

/// Result type for atom operations.
pub type AtomResult<T> = std::result::Result<T, AtomError>;

/// Dense index of a ground atom inside an atom store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct AtomId(u32);

impl AtomId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for AtomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "atom:{}", self.0)
    }
}

impl From<u32> for AtomId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Interface the inference core needs from the atom store.
///
/// Implementations are owned by the database layer; the core never copies
/// atom identity, only reads and writes values by index.
pub trait AtomStore {
    /// Number of atoms held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value(&self, atom: AtomId) -> AtomResult<f32>;

    /// Assign a random-variable atom. Values are clamped into `[0, 1]`.
    fn set_value(&mut self, atom: AtomId, value: f32) -> AtomResult<()>;

    fn is_fixed(&self, atom: AtomId) -> AtomResult<bool>;

    /// Union-find root of the set containing `atom`.
    fn find_root(&mut self, atom: AtomId) -> AtomResult<AtomId>;

    /// Merge the sets of `a` and `b`, returning the surviving root.
    fn union(&mut self, a: AtomId, b: AtomId) -> AtomResult<AtomId>;

    /// Return every atom to its own singleton set (start of a grounding round).
    fn reset_partition(&mut self);

    /// Check that `atom` is held by this store.
    fn check(&self, atom: AtomId) -> AtomResult<()> {
        if atom.index() < self.len() {
            Ok(())
        } else {
            Err(AtomError::OutOfRange {
                index: atom.get(),
                len: self.len(),
            })
        }
    }
}

/// Serializable record for one atom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomRecord {
    pub value: f32,
    /// Observed atoms are fixed; random variables are free.
    pub fixed: bool,
}

/// In-memory atom store: flat value and flag arrays plus the disjoint-set forest.
#[derive(Debug, Clone, Default)]
pub struct MemAtomStore {
    values: Vec<f32>,
    fixed: Vec<bool>,
    partition: DisjointSet,
}

impl MemAtomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            fixed: Vec::with_capacity(capacity),
            partition: DisjointSet::default(),
        }
    }

    /// Register an observed atom with a fixed truth value.
    pub fn add_observed(&mut self, value: f32) -> AtomResult<AtomId> {
        self.push(value, true)
    }

    /// Register a random-variable atom with an initial truth value.
    pub fn add_variable(&mut self, value: f32) -> AtomResult<AtomId> {
        self.push(value, false)
    }

    /// Register an atom from its record.
    pub fn push_record(&mut self, record: AtomRecord) -> AtomResult<AtomId> {
        self.push(record.value, record.fixed)
    }

    fn push(&mut self, value: f32, fixed: bool) -> AtomResult<AtomId> {
        let index = self.values.len() as u32;
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(AtomError::InvalidValue { index, value });
        }
        self.values.push(value);
        self.fixed.push(fixed);
        self.partition.push();
        Ok(AtomId::new(index))
    }

    /// All current values, indexed by atom.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Snapshot every atom as a record.
    pub fn records(&self) -> Vec<AtomRecord> {
        self.values
            .iter()
            .zip(&self.fixed)
            .map(|(&value, &fixed)| AtomRecord { value, fixed })
            .collect()
    }

    /// Number of random-variable (non-fixed) atoms.
    pub fn num_variables(&self) -> usize {
        self.fixed.iter().filter(|f| !**f).count()
    }
}

impl AtomStore for MemAtomStore {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn value(&self, atom: AtomId) -> AtomResult<f32> {
        self.check(atom)?;
        Ok(self.values[atom.index()])
    }

    fn set_value(&mut self, atom: AtomId, value: f32) -> AtomResult<()> {
        self.check(atom)?;
        if self.fixed[atom.index()] {
            return Err(AtomError::Fixed { index: atom.get() });
        }
        if !value.is_finite() {
            return Err(AtomError::InvalidValue {
                index: atom.get(),
                value,
            });
        }
        self.values[atom.index()] = value.clamp(0.0, 1.0);
        Ok(())
    }

    fn is_fixed(&self, atom: AtomId) -> AtomResult<bool> {
        self.check(atom)?;
        Ok(self.fixed[atom.index()])
    }

    fn find_root(&mut self, atom: AtomId) -> AtomResult<AtomId> {
        self.check(atom)?;
        Ok(AtomId::new(self.partition.find(atom.get())))
    }

    fn union(&mut self, a: AtomId, b: AtomId) -> AtomResult<AtomId> {
        self.check(a)?;
        self.check(b)?;
        Ok(AtomId::new(self.partition.union(a.get(), b.get())))
    }

    fn reset_partition(&mut self) {
        self.partition.reset();
    }
}
