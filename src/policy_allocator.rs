//! Compile-time, type-directed routing of node allocations to one of a
//! small number of shared pools (spec.md §4.5), modeled on the original's
//! `PolicyBasedHugePageAllocator` + `TwoPoolPolicy`.
//!
//! The original detects "is this a leaf node" via member-presence
//! reflection (`has_next_leaf_v<T>`, `has_children_are_leaves_v<T>`) on
//! whatever struct the caller happens to pass in. Rust has no stable
//! equivalent of that reflection, so [`NodeKind`] makes the same fact an
//! explicit, compile-time-checked associated constant that `LeafNode` and
//! `InternalNode` implement directly — still zero-cost, still resolved
//! entirely at compile time, just spelled out instead of inferred from
//! shape.

use std::cell::RefCell;
use std::mem;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::error::PoolResult;
use crate::pool::Pool;

/// Typical x86-64 cache line size; allocations are padded up to this so
/// that two nodes never share a cache line (spec.md §4.5).
pub const CACHE_LINE_SIZE: usize = 64;

/// Identifies whether a node type is a leaf or an internal node, for
/// routing purposes only. Implemented by [`crate::node::LeafNode`] and
/// [`crate::node::InternalNode`].
pub trait NodeKind {
    const IS_LEAF: bool;
}

/// A policy that maps a [`NodeKind`] to the pool that should serve its
/// allocations.
pub trait PoolPolicy {
    fn pool_for<T: NodeKind>(&self) -> Rc<RefCell<Pool>>;
}

/// Routes leaf-node allocations to one pool and internal-node allocations
/// to another (spec.md §4.5's default, and only, policy).
///
/// Cloning a `TwoPoolPolicy` clones the `Rc`s, not the pools — every
/// clone still shares the same two underlying pools, which is what lets
/// multiple `BTree`s opt into shared node storage (spec.md §5).
#[derive(Clone)]
pub struct TwoPoolPolicy {
    leaf_pool: Rc<RefCell<Pool>>,
    internal_pool: Rc<RefCell<Pool>>,
}

impl TwoPoolPolicy {
    pub fn new(leaf_pool: Rc<RefCell<Pool>>, internal_pool: Rc<RefCell<Pool>>) -> Self {
        Self {
            leaf_pool,
            internal_pool,
        }
    }

    pub fn leaf_pool(&self) -> &Rc<RefCell<Pool>> {
        &self.leaf_pool
    }

    pub fn internal_pool(&self) -> &Rc<RefCell<Pool>> {
        &self.internal_pool
    }
}

impl PoolPolicy for TwoPoolPolicy {
    fn pool_for<T: NodeKind>(&self) -> Rc<RefCell<Pool>> {
        if T::IS_LEAF {
            self.leaf_pool.clone()
        } else {
            self.internal_pool.clone()
        }
    }
}

#[inline]
fn allocation_alignment<T>() -> usize {
    mem::align_of::<T>().max(CACHE_LINE_SIZE)
}

/// Allocates and frees single nodes of type `T` through whatever pool `P`
/// routes `T` to (spec.md §4.5).
///
/// Unlike a general-purpose `Allocator`, this only ever hands out one `T`
/// at a time — there is no array allocation path, matching the original's
/// `allocate(n)` which rejects any `n != 1`.
pub struct PolicyAllocator<P: PoolPolicy> {
    policy: P,
}

impl<P: PoolPolicy> PolicyAllocator<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Allocates uninitialized storage for one `T`. The caller is
    /// responsible for writing a valid `T` into it before treating it as
    /// initialized (mirrors `PooledArena::insert`'s contract).
    pub fn allocate<T: NodeKind>(&self) -> PoolResult<NonNull<T>> {
        let bytes = mem::size_of::<T>().max(mem::size_of::<*mut u8>());
        let align = allocation_alignment::<T>();
        let pool = self.policy.pool_for::<T>();
        let raw = pool.borrow_mut().allocate(bytes, align)?;
        Ok(NonNull::new(raw as *mut T).expect("Pool::allocate never returns null for bytes > 0"))
    }

    /// Returns a previously-allocated `T`'s storage to its pool. The
    /// caller must have already dropped/read out any value stored there.
    pub fn deallocate<T: NodeKind>(&self, ptr: NonNull<T>) {
        let bytes = mem::size_of::<T>().max(mem::size_of::<*mut u8>());
        let pool = self.policy.pool_for::<T>();
        pool.borrow_mut().deallocate(ptr.as_ptr() as *mut u8, bytes);
    }
}

impl<P: PoolPolicy + Clone> Clone for PolicyAllocator<P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
        }
    }
}

/// Convenience constructor mirroring the original's
/// `make_two_pool_allocator`: builds two fresh hugepage pools sized for
/// leaf and internal node storage and wraps them in a `TwoPoolPolicy`.
pub fn two_pool_allocator(
    leaf_pool_size: usize,
    internal_pool_size: usize,
    use_hugepages: bool,
) -> PoolResult<PolicyAllocator<TwoPoolPolicy>> {
    let leaf_pool = Rc::new(RefCell::new(Pool::new(
        leaf_pool_size,
        use_hugepages,
        crate::pool::DEFAULT_GROWTH_SIZE,
    )?));
    let internal_pool = Rc::new(RefCell::new(Pool::new(
        internal_pool_size,
        use_hugepages,
        crate::pool::DEFAULT_GROWTH_SIZE,
    )?));
    Ok(PolicyAllocator::new(TwoPoolPolicy::new(
        leaf_pool,
        internal_pool,
    )))
}
