//! Pool statistics.

use core::cell::Cell;

/// Snapshot of a pool's counters.
///
/// Maintained only while debug checks are enabled. The two "in use"
/// gauges move both ways; everything else is monotone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Free blocks currently on the free list.
    pub free_blocks: usize,
    /// Blocks currently allocated.
    pub blocks_in_use: usize,
    /// Pages currently owned by the pool.
    pub pages_in_use: usize,
    /// High-water mark of `blocks_in_use`.
    pub most_blocks_in_use: usize,
    /// High-water mark of `pages_in_use`.
    pub most_pages_in_use: usize,
    /// Total allocations performed.
    pub allocations: usize,
    /// Total deallocations performed.
    pub deallocations: usize,
}

/// Interior-mutable counters behind a shared pool reference.
#[derive(Debug, Default)]
pub(crate) struct StatsCells {
    pub free_blocks: Cell<usize>,
    pub blocks_in_use: Cell<usize>,
    pub pages_in_use: Cell<usize>,
    pub most_blocks_in_use: Cell<usize>,
    pub most_pages_in_use: Cell<usize>,
    pub allocations: Cell<usize>,
    pub deallocations: Cell<usize>,
}

impl StatsCells {
    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            free_blocks: self.free_blocks.get(),
            blocks_in_use: self.blocks_in_use.get(),
            pages_in_use: self.pages_in_use.get(),
            most_blocks_in_use: self.most_blocks_in_use.get(),
            most_pages_in_use: self.most_pages_in_use.get(),
            allocations: self.allocations.get(),
            deallocations: self.deallocations.get(),
        }
    }

    pub(crate) fn record_allocation(&self) {
        self.allocations.set(self.allocations.get() + 1);
        let in_use = self.blocks_in_use.get() + 1;
        self.blocks_in_use.set(in_use);
        if in_use > self.most_blocks_in_use.get() {
            self.most_blocks_in_use.set(in_use);
        }
        self.free_blocks.set(self.free_blocks.get() - 1);
    }

    pub(crate) fn record_deallocation(&self) {
        self.deallocations.set(self.deallocations.get() + 1);
        self.blocks_in_use.set(self.blocks_in_use.get() - 1);
        self.free_blocks.set(self.free_blocks.get() + 1);
    }

    pub(crate) fn record_page(&self, blocks_per_page: usize) {
        let pages = self.pages_in_use.get() + 1;
        self.pages_in_use.set(pages);
        if pages > self.most_pages_in_use.get() {
            self.most_pages_in_use.set(pages);
        }
        self.free_blocks.set(self.free_blocks.get() + blocks_per_page);
    }
}
