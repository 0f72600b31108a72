//! Index-based disjoint-set forest over atom indices.
//!
//! Parents live in a flat array; `find` compresses paths by halving and
//! `union` links by size. Merges are monotonic: sets only ever grow for the
//! lifetime of a grounding round.

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl DisjointSet {
    /// Create `n` singleton sets `{0}, {1}, ..., {n-1}`.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
        }
    }

    /// Append one more singleton set and return its index.
    pub fn push(&mut self) -> u32 {
        let idx = self.parent.len() as u32;
        self.parent.push(idx);
        self.size.push(1);
        idx
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Root of the set containing `x`. Panics if `x` is out of range;
    /// callers validate indices first.
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Merge the sets containing `a` and `b`, returning the surviving root.
    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra as usize] >= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        big
    }

    /// Number of elements in the set containing `x`.
    pub fn set_size(&mut self, x: u32) -> usize {
        let root = self.find(x);
        self.size[root as usize] as usize
    }

    /// Reset every element back to a singleton.
    pub fn reset(&mut self) {
        for (i, p) in self.parent.iter_mut().enumerate() {
            *p = i as u32;
        }
        self.size.fill(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_are_their_own_roots() {
        let mut ds = DisjointSet::new(4);
        for i in 0..4 {
            assert_eq!(ds.find(i), i);
            assert_eq!(ds.set_size(i), 1);
        }
    }

    #[test]
    fn union_links_smaller_under_larger() {
        let mut ds = DisjointSet::new(5);
        let r = ds.union(0, 1);
        let r2 = ds.union(2, r);
        assert_eq!(r, r2);
        assert_eq!(ds.set_size(2), 3);
        assert_eq!(ds.find(2), ds.find(0));
        assert_ne!(ds.find(3), ds.find(0));
    }

    #[test]
    fn union_of_same_set_is_noop() {
        let mut ds = DisjointSet::new(3);
        let r = ds.union(0, 1);
        assert_eq!(ds.union(1, 0), r);
        assert_eq!(ds.set_size(0), 2);
    }

    #[test]
    fn long_chain_compresses() {
        let mut ds = DisjointSet::new(1000);
        for i in 1..1000 {
            ds.union(i - 1, i);
        }
        let root = ds.find(999);
        for i in 0..1000 {
            assert_eq!(ds.find(i), root);
        }
        assert_eq!(ds.set_size(0), 1000);
    }

    #[test]
    fn reset_restores_singletons() {
        let mut ds = DisjointSet::new(3);
        ds.union(0, 2);
        ds.reset();
        assert_ne!(ds.find(0), ds.find(2));
        assert_eq!(ds.push(), 3);
        assert_eq!(ds.len(), 4);
    }
}
