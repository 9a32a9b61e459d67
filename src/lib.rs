//! Cache-friendly, in-memory ordered key→value containers: a dense sorted
//! array (`DenseMap`) used as the per-node storage of a B+ tree (`BTree`),
//! backed by a family of hugepage-aware memory pools.
//!
//! The design goal is raw lookup/insert/erase throughput at moderate scale,
//! achieved by combining wide cache-line-tuned nodes, progressive
//! SIMD-accelerated search over primitive and fixed-size byte-array keys,
//! bulk SIMD-friendly data movement during split/merge, hugepage-backed
//! pools that reduce TLB pressure, and hysteresis-tempered rebalancing so
//! insert/erase churn right at a node's fill threshold doesn't thrash.
//!
//! ```
//! use fast_containers::BTree;
//! use fast_containers::comparator::DefaultComparator;
//! use fast_containers::search::Binary;
//! use fast_containers::policy_allocator::TwoPoolPolicy;
//!
//! type Map = BTree<i32, &'static str, 32, 32, DefaultComparator<i32>, Binary, TwoPoolPolicy>;
//!
//! let mut tree = Map::new().unwrap();
//! tree.insert(1, "one").unwrap();
//! tree.insert(2, "two").unwrap();
//! assert_eq!(tree.get(&1), Some(&"one"));
//! assert_eq!(tree.len(), 2);
//! ```
//!
//! # Layout
//!
//! - [`dense_map`] — the fixed-capacity sorted key/value array every tree
//!   node is built from, with pluggable search strategy ([`search`]).
//! - [`btree`] — the B+ tree itself: descent, split, borrow, merge, parent
//!   key maintenance, and the leaf-chain iterators.
//! - [`pool`], [`multi_size_pool`], [`policy_allocator`] — the hugepage bump
//!   allocator family that backs every node allocation.
//! - [`keys`], [`simd_keys`] — the key types and encodings the SIMD search
//!   path supports.
//! - [`arena`], [`node`] — the pool-backed, index-stable node storage that
//!   glues the tree to the allocator.

pub mod arena;
pub mod btree;
pub mod comparator;
pub mod dense_map;
pub mod error;
pub mod keys;
pub mod multi_size_pool;
pub mod node;
pub mod policy_allocator;
pub mod pool;
pub mod search;
pub mod simd_keys;

pub use btree::BTree;
pub use dense_map::DenseMap;
pub use error::{BTreeError, BTreeResult, DenseMapError, DenseMapResult, PoolError, PoolResult};
pub use multi_size_pool::MultiSizePool;
pub use pool::Pool;
