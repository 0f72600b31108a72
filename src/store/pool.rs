//! Fixed-capacity arena of reusable term slots.
//!
//! The pool holds at most one page of terms. Slots are allocated once and
//! overwritten in place on every page load, so steady-state paging does not
//! allocate. Term references lent out of the pool are valid only until the
//! next load, which the borrow checker enforces through `&mut` access.

use crate::error::PageError;
use crate::term::Term;

#[derive(Debug)]
pub struct TermPool {
    slots: Vec<Term>,
    len: usize,
    capacity: usize,
}

impl TermPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            len: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Forget the current contents. Slots stay allocated for reuse.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Hand out the next slot for the caller to overwrite.
    pub fn next_slot(&mut self) -> Result<&mut Term, PageError> {
        if self.len >= self.capacity {
            return Err(PageError::PoolOverflow {
                terms: self.len + 1,
                capacity: self.capacity,
            });
        }
        if self.len == self.slots.len() {
            self.slots.push(Term::placeholder());
        }
        let slot = &mut self.slots[self.len];
        self.len += 1;
        Ok(slot)
    }

    /// Copy `term` into the next slot.
    pub fn push(&mut self, term: &Term) -> Result<usize, PageError> {
        let index = self.len;
        self.next_slot()?.assign_from(term);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<&Term> {
        if index < self.len {
            self.slots.get(index)
        } else {
            None
        }
    }

    /// The live terms, in load order.
    pub fn as_slice(&self) -> &[Term] {
        &self.slots[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [Term] {
        &mut self.slots[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomId;
    use crate::rule::RuleId;
    use crate::term::{PotentialKind, Weight};

    fn term(rule: u32, arity: u32) -> Term {
        Term::new(
            RuleId::new(rule),
            PotentialKind::Hinge,
            Weight::Soft(1.0),
            (0..arity).map(AtomId::new).collect(),
            vec![1.0; arity as usize],
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn capacity_is_enforced() {
        let mut pool = TermPool::new(2);
        pool.push(&term(0, 1)).unwrap();
        pool.push(&term(1, 1)).unwrap();
        assert!(pool.is_full());
        assert!(matches!(
            pool.push(&term(2, 1)),
            Err(PageError::PoolOverflow {
                terms: 3,
                capacity: 2
            })
        ));
    }

    #[test]
    fn clear_keeps_slots_and_overwrites_in_place() {
        let mut pool = TermPool::new(2);
        pool.push(&term(0, 3)).unwrap();
        pool.clear();
        assert!(pool.is_empty());
        assert!(pool.get(0).is_none());
        pool.push(&term(5, 1)).unwrap();
        let slot = pool.get(0).unwrap();
        assert_eq!(slot.rule(), RuleId::new(5));
        assert_eq!(slot.size(), 1);
        assert_eq!(pool.as_slice().len(), 1);
    }
}
