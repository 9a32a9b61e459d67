//! `Pool`: a hugepage-backed bump allocator with an intrusive free list
//! (spec.md §4.3).
//!
//! Mirrors the original `HugePagePool` almost operation-for-operation:
//! anonymous `mmap` with `MAP_HUGETLB` when available, falling back to
//! regular pages advised with `MADV_HUGEPAGE`; bump-pointer allocation
//! with alignment padding; deallocation pushes onto an intrusive
//! singly-linked free list (the freed block's own first bytes become the
//! "next free" pointer, so freeing never allocates); `grow()` appends a
//! new region and never moves or compacts existing ones, which is what
//! lets `BTree` hold raw pointers into pool memory across node lifetimes.
//!
//! Not `Send`/`Sync` by construction (the regions are raw pointers) —
//! spec.md §5's "not safe to use concurrently from multiple threads
//! without external synchronization" falls directly out of that, with no
//! separate marker needed.

use log::{debug, warn};

use crate::error::{PoolError, PoolResult};

const HUGEPAGE_SIZE: usize = 2 * 1024 * 1024;
pub const DEFAULT_INITIAL_SIZE: usize = 256 * 1024 * 1024;
pub const DEFAULT_GROWTH_SIZE: usize = 64 * 1024 * 1024;

struct MemoryRegion {
    base: *mut u8,
    size: usize,
}

#[derive(Default, Debug, Clone, Copy)]
struct Stats {
    allocations: u64,
    deallocations: u64,
    growth_events: u64,
    bytes_allocated: u64,
    current_usage: u64,
    peak_usage: u64,
}

impl Stats {
    #[inline]
    fn record_allocation(&mut self, bytes: usize) {
        self.allocations += 1;
        self.bytes_allocated += bytes as u64;
        self.current_usage += bytes as u64;
        if self.current_usage > self.peak_usage {
            self.peak_usage = self.current_usage;
        }
    }

    #[inline]
    fn record_deallocation(&mut self, bytes: usize) {
        self.deallocations += 1;
        self.current_usage = self.current_usage.saturating_sub(bytes as u64);
    }

    #[inline]
    fn record_growth(&mut self) {
        self.growth_events += 1;
    }
}

/// Raw, type-erased hugepage-backed memory pool.
///
/// `Pool` hands out untyped, aligned byte ranges; it never knows what's
/// stored in them. [`crate::multi_size_pool::MultiSizePool`] and
/// [`crate::policy_allocator::PolicyAllocator`] build typed allocation on
/// top of this.
pub struct Pool {
    regions: Vec<MemoryRegion>,
    next_free: *mut u8,
    bytes_remaining: usize,
    initial_size: usize,
    growth_size: usize,
    using_hugepages: bool,
    free_list_head: *mut u8,
    #[cfg(feature = "stats")]
    stats: Stats,
}

impl Pool {
    pub fn new(initial_size: usize, use_hugepages: bool, growth_size: usize) -> PoolResult<Self> {
        let mut using_hugepages = false;
        let region = if use_hugepages {
            match allocate_hugepage_region(initial_size) {
                Some(r) => {
                    using_hugepages = true;
                    r
                }
                None => allocate_regular_region(initial_size)?,
            }
        } else {
            allocate_regular_region(initial_size)?
        };
        let next_free = region.base;
        let bytes_remaining = region.size;
        Ok(Self {
            regions: vec![region],
            next_free,
            bytes_remaining,
            initial_size,
            growth_size,
            using_hugepages,
            free_list_head: std::ptr::null_mut(),
            #[cfg(feature = "stats")]
            stats: Stats::default(),
        })
    }

    pub fn with_defaults() -> PoolResult<Self> {
        Self::new(DEFAULT_INITIAL_SIZE, true, DEFAULT_GROWTH_SIZE)
    }

    /// Allocates `bytes` aligned to `alignment` (a power of two).
    ///
    /// Satisfies first from the free list, then by bumping the current
    /// region's cursor, growing the pool if the current region can't fit
    /// the request. Returns a dangling-but-non-null pointer for `bytes ==
    /// 0`, matching Rust allocator conventions rather than the original's
    /// `nullptr`.
    pub fn allocate(&mut self, bytes: usize, alignment: usize) -> PoolResult<*mut u8> {
        debug_assert!(alignment.is_power_of_two());
        if bytes == 0 {
            return Ok(std::ptr::NonNull::dangling().as_ptr());
        }

        if !self.free_list_head.is_null() {
            let ptr = self.free_list_head;
            self.free_list_head = unsafe { *(ptr as *const *mut u8) };
            #[cfg(feature = "stats")]
            self.stats.record_allocation(bytes);
            return Ok(ptr);
        }

        let mut current = self.next_free as usize;
        let mut aligned = (current + alignment - 1) & !(alignment - 1);
        let mut padding = aligned - current;

        if self.bytes_remaining < bytes + padding {
            self.grow(bytes + alignment)?;
            current = self.next_free as usize;
            aligned = (current + alignment - 1) & !(alignment - 1);
            padding = aligned - current;
        }

        let result = aligned as *mut u8;
        self.next_free = unsafe { result.add(bytes) };
        self.bytes_remaining -= bytes + padding;

        #[cfg(feature = "stats")]
        self.stats.record_allocation(bytes);

        Ok(result)
    }

    /// Returns `ptr` (previously obtained from [`Self::allocate`] with the
    /// same `bytes`) to the free list. `bytes` must be at least
    /// `size_of::<*mut u8>()` since the block stores the free-list link
    /// in its own first bytes while it's free.
    pub fn deallocate(&mut self, ptr: *mut u8, bytes: usize) {
        if ptr.is_null() || bytes == 0 {
            return;
        }
        debug_assert!(bytes >= std::mem::size_of::<*mut u8>());
        unsafe {
            *(ptr as *mut *mut u8) = self.free_list_head;
        }
        self.free_list_head = ptr;
        #[cfg(feature = "stats")]
        self.stats.record_deallocation(bytes);
    }

    #[inline]
    pub fn using_hugepages(&self) -> bool {
        self.using_hugepages
    }

    #[inline]
    pub fn bytes_remaining(&self) -> usize {
        self.bytes_remaining
    }

    #[inline]
    pub fn initial_size(&self) -> usize {
        self.initial_size
    }

    #[inline]
    pub fn growth_size(&self) -> usize {
        self.growth_size
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            allocations: self.stats.allocations,
            deallocations: self.stats.deallocations,
            growth_events: self.stats.growth_events,
            bytes_allocated: self.stats.bytes_allocated,
            current_usage: self.stats.current_usage,
            peak_usage: self.stats.peak_usage,
        }
    }

    fn grow(&mut self, at_least: usize) -> PoolResult<()> {
        let size = self.growth_size.max(at_least);
        let region = if self.using_hugepages {
            match allocate_hugepage_region(size) {
                Some(r) => r,
                None => {
                    warn!("pool: hugepages exhausted, falling back to regular pages on growth");
                    self.using_hugepages = false;
                    allocate_regular_region(size)?
                }
            }
        } else {
            allocate_regular_region(size)?
        };
        debug!(
            "pool: grew by {} bytes ({} regions total, hugepages={})",
            region.size,
            self.regions.len() + 1,
            self.using_hugepages
        );
        self.next_free = region.base;
        self.bytes_remaining = region.size;
        self.regions.push(region);
        #[cfg(feature = "stats")]
        self.stats.record_growth();
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for region in &self.regions {
            if !region.base.is_null() {
                unsafe {
                    libc::munmap(region.base as *mut libc::c_void, region.size);
                }
            }
        }
    }
}

/// Snapshot of [`Pool`]'s lifetime counters, only available with the
/// `stats` feature (spec.md §4.3's "optional statistics tracking").
#[cfg(feature = "stats")]
#[derive(Debug, Clone, Copy)]
pub struct PoolStatsSnapshot {
    pub allocations: u64,
    pub deallocations: u64,
    pub growth_events: u64,
    pub bytes_allocated: u64,
    pub current_usage: u64,
    pub peak_usage: u64,
}

fn round_up_to_hugepage(size: usize) -> usize {
    (size + HUGEPAGE_SIZE - 1) & !(HUGEPAGE_SIZE - 1)
}

#[cfg(target_os = "linux")]
fn allocate_hugepage_region(size: usize) -> Option<MemoryRegion> {
    let aligned_size = round_up_to_hugepage(size);
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            aligned_size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    unsafe {
        libc::madvise(ptr, aligned_size, libc::MADV_NORMAL);
        prefault(ptr as *mut u8, aligned_size, HUGEPAGE_SIZE);
    }
    Some(MemoryRegion {
        base: ptr as *mut u8,
        size: aligned_size,
    })
}

#[cfg(not(target_os = "linux"))]
fn allocate_hugepage_region(_size: usize) -> Option<MemoryRegion> {
    None
}

fn allocate_regular_region(size: usize) -> PoolResult<MemoryRegion> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(PoolError::OutOfMemory);
    }
    #[cfg(target_os = "linux")]
    unsafe {
        libc::madvise(ptr, size, libc::MADV_HUGEPAGE);
    }
    unsafe {
        prefault(ptr as *mut u8, size, 4096);
    }
    Ok(MemoryRegion {
        base: ptr as *mut u8,
        size,
    })
}

/// Touches one byte per `page_size`-sized page so the kernel actually
/// backs the mapping now, on the NUMA node this thread is running on
/// (first-touch policy), rather than lazily on first real access.
unsafe fn prefault(base: *mut u8, size: usize, page_size: usize) {
    let mut offset = 0usize;
    while offset < size {
        std::ptr::write_volatile(base.add(offset), 0u8);
        offset += page_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_aligned_distinct_pointers() {
        let mut pool = Pool::new(1024 * 1024, false, 1024 * 1024).unwrap();
        let a = pool.allocate(64, 32).unwrap();
        let b = pool.allocate(64, 32).unwrap();
        assert_ne!(a, b);
        assert_eq!(a as usize % 32, 0);
        assert_eq!(b as usize % 32, 0);
    }

    #[test]
    fn deallocate_then_allocate_reuses_freed_block() {
        let mut pool = Pool::new(1024 * 1024, false, 1024 * 1024).unwrap();
        let a = pool.allocate(64, 8).unwrap();
        pool.deallocate(a, 64);
        let remaining_before = pool.bytes_remaining();
        let b = pool.allocate(64, 8).unwrap();
        assert_eq!(a, b, "freed block should be reused before bumping further");
        assert_eq!(pool.bytes_remaining(), remaining_before);
    }

    #[test]
    fn grow_appends_region_without_moving_existing_allocations() {
        let _ = env_logger::try_init();
        let mut pool = Pool::new(4096, false, 4096).unwrap();
        let first = pool.allocate(4096, 8).unwrap();
        // Pool is now exhausted; this allocation forces a grow().
        let second = pool.allocate(64, 8).unwrap();
        assert_eq!(pool.region_count(), 2);
        // The old pointer is still valid; growth never invalidates it.
        unsafe {
            std::ptr::write_volatile(first, 7u8);
            assert_eq!(std::ptr::read_volatile(first), 7u8);
        }
        assert_ne!(first, second);
    }

    #[test]
    fn zero_byte_allocation_is_a_noop() {
        let mut pool = Pool::new(4096, false, 4096).unwrap();
        let remaining = pool.bytes_remaining();
        let p = pool.allocate(0, 8).unwrap();
        assert!(!p.is_null());
        assert_eq!(pool.bytes_remaining(), remaining);
    }
}
