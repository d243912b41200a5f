//! Budgeted accounting for lazily loaded metadata sections.

use std::sync::atomic::{AtomicU64, Ordering};

/// What a tracked allocation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryType {
    /// Fragment footers.
    Footer,
    /// The R-tree over tile MBRs.
    RTree,
    /// Tile offset, var offset, var size, and validity offset vectors.
    TileOffsets,
    /// Per-tile and per-fragment min/max/sum/null-count buffers.
    MinMaxSumNullCount,
    /// Processed delete conditions.
    ProcessedConditions,
}

const MEMORY_TYPE_NUM: usize = 5;

impl MemoryType {
    fn slot(self) -> usize {
        match self {
            MemoryType::Footer => 0,
            MemoryType::RTree => 1,
            MemoryType::TileOffsets => 2,
            MemoryType::MinMaxSumNullCount => 3,
            MemoryType::ProcessedConditions => 4,
        }
    }
}

/// Tracks memory used by lazily loaded sections against a global budget.
///
/// `take_memory` must be called before a section is allocated; a refusal
/// leaves all counters untouched so the caller can free other sections and
/// retry.
#[derive(Debug)]
pub struct MemoryTracker {
    budget: u64,
    used: AtomicU64,
    by_type: [AtomicU64; MEMORY_TYPE_NUM],
}

impl MemoryTracker {
    /// A tracker with the given budget in bytes.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: AtomicU64::new(0),
            by_type: Default::default(),
        }
    }

    /// The configured budget in bytes.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Bytes currently accounted for.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    pub fn available(&self) -> u64 {
        self.budget.saturating_sub(self.used())
    }

    /// Bytes accounted against one memory type.
    pub fn used_by(&self, memory_type: MemoryType) -> u64 {
        self.by_type[memory_type.slot()].load(Ordering::Acquire)
    }

    /// Atomically reserve `n` bytes. Returns `false`, changing nothing, if
    /// the budget cannot cover them.
    pub fn take_memory(&self, n: u64, memory_type: MemoryType) -> bool {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let Some(next) = current.checked_add(n) else {
                return false;
            };
            if next > self.budget {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.by_type[memory_type.slot()].fetch_add(n, Ordering::AcqRel);
        true
    }

    /// Return `n` bytes to the budget.
    pub fn release_memory(&self, n: u64, memory_type: MemoryType) {
        self.used.fetch_sub(n, Ordering::AcqRel);
        self.by_type[memory_type.slot()].fetch_sub(n, Ordering::AcqRel);
    }
}
