//! Identifier allocation for engine rules
//!
//! Identifiers must be unique against everything currently installed in the
//! engine, including rules this process did not create. The allocator keeps
//! a monotonically advancing counter plus the set of identifiers considered
//! in use; released identifiers are not reused ahead of the counter, which
//! keeps in-flight removals from racing fresh installs.
//!
//! The allocator is a plain synchronous value. Exclusion is the owner's
//! concern; it is never shared as module-level state.

use std::collections::BTreeSet;

/// Identifiers start at 1. Some engines treat 0 as "no rule".
const FIRST_ID: u32 = 1;

/// Install attempts per rule before a writer gives up on id collisions.
/// Collisions need a foreign writer racing the same id space; two honest
/// writers converge after one skip.
pub const MAX_INSTALL_ATTEMPTS: u32 = 5;

/// Hands out rule identifiers unique among all ids marked in use.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u32,
    in_use: BTreeSet<u32>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: FIRST_ID,
            in_use: BTreeSet::new(),
        }
    }

    /// Claim and return the next free identifier.
    ///
    /// Advances past any value already marked in use. On counter wrap the
    /// search continues from [`FIRST_ID`]; 0 is never issued.
    pub fn allocate(&mut self) -> u32 {
        loop {
            let candidate = self.next;
            self.next = match self.next.checked_add(1) {
                Some(next) => next,
                None => FIRST_ID,
            };
            if candidate == 0 {
                continue;
            }
            if self.in_use.insert(candidate) {
                return candidate;
            }
        }
    }

    /// Return an identifier to the free pool. Returns whether it was tracked.
    pub fn release(&mut self, id: u32) -> bool {
        self.in_use.remove(&id)
    }

    /// Record an identifier owned by someone else so `allocate` skips it.
    /// Returns false if the id was already tracked.
    pub fn mark_taken(&mut self, id: u32) -> bool {
        self.in_use.insert(id)
    }

    /// Forget everything. Only valid once the engine is verifiably empty.
    pub fn reset(&mut self) {
        self.in_use.clear();
        self.next = FIRST_ID;
    }

    pub fn is_in_use(&self, id: u32) -> bool {
        self.in_use.contains(&id)
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    /// Ids currently tracked, ascending.
    pub fn in_use_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.in_use.iter().copied()
    }
}
