//! `MultiSizePool`: routes allocations of varying sizes to a set of
//! per-size-class [`Pool`]s, so that same-sized blocks end up adjacent in
//! memory and can be recycled through each class's own free list
//! (spec.md §4.4).
//!
//! Rounding rule (spec.md §4.4):
//! - `bytes <= 512`   → round up to the next multiple of 64
//! - `bytes <= 2048`  → round up to the next multiple of 256
//! - `bytes > 2048`   → round up to the next power of two
//!
//! Pools are created lazily, on first allocation into a given class, so a
//! `MultiSizePool` that only ever serves one node size never pays for a
//! second region.

use std::collections::HashMap;

use crate::error::PoolResult;
use crate::pool::{Pool, DEFAULT_GROWTH_SIZE, DEFAULT_INITIAL_SIZE};

/// Rounds `bytes` up to its size class under spec.md §4.4's rule.
pub fn size_class(bytes: usize) -> usize {
    const SMALL_CUTOFF: usize = 512;
    const MEDIUM_CUTOFF: usize = 2048;
    if bytes == 0 {
        0
    } else if bytes <= SMALL_CUTOFF {
        round_up_to_multiple(bytes, 64)
    } else if bytes <= MEDIUM_CUTOFF {
        round_up_to_multiple(bytes, 256)
    } else {
        bytes.next_power_of_two()
    }
}

fn round_up_to_multiple(bytes: usize, multiple: usize) -> usize {
    (bytes + multiple - 1) / multiple * multiple
}

/// A bank of [`Pool`]s keyed by size class.
pub struct MultiSizePool {
    pools: HashMap<usize, Pool>,
    use_hugepages: bool,
    initial_size_per_class: usize,
    growth_size_per_class: usize,
}

impl MultiSizePool {
    pub fn new(use_hugepages: bool) -> Self {
        Self::with_region_sizes(use_hugepages, DEFAULT_INITIAL_SIZE, DEFAULT_GROWTH_SIZE)
    }

    pub fn with_region_sizes(
        use_hugepages: bool,
        initial_size_per_class: usize,
        growth_size_per_class: usize,
    ) -> Self {
        Self {
            pools: HashMap::new(),
            use_hugepages,
            initial_size_per_class,
            growth_size_per_class,
        }
    }

    /// Allocates `bytes` aligned to `alignment`, rounding `bytes` up to
    /// its size class and routing the request to that class's `Pool`
    /// (creating it on first use).
    pub fn allocate(&mut self, bytes: usize, alignment: usize) -> PoolResult<*mut u8> {
        let class = size_class(bytes);
        let pool = self.pool_for_class(class)?;
        pool.allocate(class, alignment)
    }

    /// Returns a block of `bytes` (the caller's original, un-rounded
    /// request) to its size class's pool.
    pub fn deallocate(&mut self, ptr: *mut u8, bytes: usize) {
        let class = size_class(bytes);
        if let Some(pool) = self.pools.get_mut(&class) {
            pool.deallocate(ptr, class);
        }
    }

    pub fn class_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool_for_class_ref(&self, class: usize) -> Option<&Pool> {
        self.pools.get(&class)
    }

    fn pool_for_class(&mut self, class: usize) -> PoolResult<&mut Pool> {
        if !self.pools.contains_key(&class) {
            let pool = Pool::new(
                self.initial_size_per_class,
                self.use_hugepages,
                self.growth_size_per_class,
            )?;
            self.pools.insert(class, pool);
        }
        Ok(self.pools.get_mut(&class).expect("just inserted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_class_boundaries() {
        assert_eq!(size_class(0), 0);
        assert_eq!(size_class(1), 64);
        assert_eq!(size_class(64), 64);
        assert_eq!(size_class(65), 128);
        assert_eq!(size_class(512), 512);
        assert_eq!(size_class(513), 768);
        assert_eq!(size_class(2048), 2048);
        assert_eq!(size_class(2049), 4096);
        assert_eq!(size_class(3000), 4096);
        assert_eq!(size_class(4096), 4096);
        assert_eq!(size_class(4097), 8192);
    }

    #[test]
    fn same_class_requests_share_a_pool() {
        let mut mp = MultiSizePool::with_region_sizes(false, 4096, 4096);
        mp.allocate(40, 8).unwrap();
        mp.allocate(60, 8).unwrap();
        assert_eq!(mp.class_count(), 1);
    }

    #[test]
    fn distinct_classes_get_distinct_pools() {
        let mut mp = MultiSizePool::with_region_sizes(false, 4096, 4096);
        mp.allocate(40, 8).unwrap();
        mp.allocate(3000, 8).unwrap();
        assert_eq!(mp.class_count(), 2);
    }

    #[test]
    fn allocate_then_deallocate_then_reallocate_reuses_block() {
        let mut mp = MultiSizePool::with_region_sizes(false, 4096, 4096);
        let p = mp.allocate(40, 8).unwrap();
        mp.deallocate(p, 40);
        let q = mp.allocate(40, 8).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn allocate_and_deallocate_agree_on_class_when_alignment_exceeds_size() {
        // Regression: `allocate` must pick its pool from `size_class(bytes)`
        // alone, matching `deallocate`'s computation — an alignment bigger
        // than the request used to push the class up on allocate without a
        // matching push on deallocate, handing the block back to the wrong
        // pool's free list.
        let mut mp = MultiSizePool::with_region_sizes(false, 4096, 4096);
        let p = mp.allocate(10, 512).unwrap();
        assert_eq!(mp.class_count(), 1);
        mp.deallocate(p, 10);
        let q = mp.allocate(10, 512).unwrap();
        assert_eq!(p, q, "freed block should be reused from the same class's pool");
        assert_eq!(mp.class_count(), 1);
    }
}
