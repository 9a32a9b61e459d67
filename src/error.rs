//! Error types for every layer of the crate: `DenseMap` precondition
//! violations, `BTree` lookup failures, and `Pool` allocation failures.
//!
//! Kept as plain hand-rolled enums (no `thiserror`/`anyhow`) with manual
//! `Display` and `std::error::Error` impls, matching the rest of this
//! crate's dependency-light error handling.

use std::fmt;

/// Precondition violations raised by [`crate::dense_map::DenseMap`].
///
/// Per spec these never occur under correct `BTree` usage; they exist so
/// that `DenseMap`'s own contract is checkable independent of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseMapError {
    /// `insert`/`insert_hint` called on a map already at `capacity()`.
    Full,
    /// `split_at` called with a non-empty `other` or insufficient capacity.
    BadSplitTarget,
    /// `transfer_prefix_from`/`transfer_suffix_from` violated a precondition
    /// (count exceeds source size, or destination would overflow).
    BadTransfer,
}

impl fmt::Display for DenseMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "dense map is at capacity"),
            Self::BadSplitTarget => write!(f, "split target is not an empty map with enough capacity"),
            Self::BadTransfer => write!(f, "transfer violates source/destination size preconditions"),
        }
    }
}

impl std::error::Error for DenseMapError {}

/// Errors surfaced by [`crate::btree::BTree`] to callers.
///
/// All other structural violations (dereferencing `end()`, decrementing
/// past `begin()`, double-erasing) are programming errors and panic via
/// `assert!`/`debug_assert!` rather than being represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreeError {
    /// `at`/`at_mut` called with a key that is not present.
    KeyNotFound,
}

impl fmt::Display for BTreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound => write!(f, "key not found"),
        }
    }
}

impl std::error::Error for BTreeError {}

/// Errors surfaced by the [`crate::pool`] allocator family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The kernel refused to map a new region (hugepage or regular).
    OutOfMemory,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "pool failed to map a new memory region"),
        }
    }
}

impl std::error::Error for PoolError {}

pub type DenseMapResult<T> = Result<T, DenseMapError>;
pub type BTreeResult<T> = Result<T, BTreeError>;
pub type PoolResult<T> = Result<T, PoolError>;
