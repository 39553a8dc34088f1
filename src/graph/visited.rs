//! Visited-node tracking for graph traversal.
//!
//! The dense form is a generation-stamped array: each `clear()` bumps a
//! counter instead of zeroing memory. The hashed form trades speed for
//! memory proportional to the nodes actually touched, for graphs where a
//! per-node array per thread would be too large.

use std::cell::RefCell;
use std::collections::HashSet;

/// Generation-stamped visited set with O(1) insert and amortized O(1) clear.
/// Uses u16 generations, so a full memset happens every 65534 clears.
#[derive(Debug)]
pub struct DenseVisited {
    data: Vec<u16>,
    generation: u16,
}

impl DenseVisited {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u16; capacity],
            generation: 1,
        }
    }

    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.data.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    /// Grow to cover at least `cap` ids.
    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.data.len() {
            self.data.resize(cap, 0);
        }
    }

    /// Mark `id` visited. Returns `true` if it was not visited before.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.data.len() {
            self.data.resize(idx + 1, 0);
        }
        if self.data[idx] == self.generation {
            false
        } else {
            self.data[idx] = self.generation;
            true
        }
    }
}

/// Visited set used by one traversal.
#[derive(Debug)]
pub enum VisitedSet {
    Dense(DenseVisited),
    Hashed(HashSet<u32>),
}

impl VisitedSet {
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        match self {
            VisitedSet::Dense(d) => d.insert(id),
            VisitedSet::Hashed(h) => h.insert(id),
        }
    }
}

thread_local! {
    /// Per-thread dense set reused across searches on the same thread.
    static DENSE_POOL: RefCell<DenseVisited> = RefCell::new(DenseVisited::new(0));
}

/// Run `f` with a cleared visited set sized for `capacity` ids.
///
/// Dense mode borrows the thread-local pool; a re-entrant call on the same
/// thread (an oracle that searches from inside `distance`) gets a fresh set.
pub fn with_visited<R>(capacity: usize, hashed: bool, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    if hashed {
        let mut set = VisitedSet::Hashed(HashSet::new());
        return f(&mut set);
    }
    DENSE_POOL.with(|cell| match cell.try_borrow_mut() {
        Ok(mut pooled) => {
            let mut dense = std::mem::replace(&mut *pooled, DenseVisited::new(0));
            dense.ensure_capacity(capacity);
            dense.clear();
            let mut set = VisitedSet::Dense(dense);
            let out = f(&mut set);
            if let VisitedSet::Dense(dense) = set {
                *pooled = dense;
            }
            out
        }
        Err(_) => f(&mut VisitedSet::Dense(DenseVisited::new(capacity))),
    })
}
