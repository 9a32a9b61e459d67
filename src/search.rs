//! Search algorithms used inside a [`crate::dense_map::DenseMap`]: `Linear`,
//! `Binary`, and `Simd` (spec.md §4.1's three search modes), selected at
//! compile time as a type parameter rather than a runtime enum — the same
//! compile-time-dispatch idiom the teacher crate uses to pick leaf node
//! representations by trait bound instead of a runtime flag.

use crate::comparator::Comparator;
use crate::simd_keys::SimdKey;

/// Strategy for locating keys inside a sorted `keys[0..len)` slice.
///
/// Implementations of `lower_bound` must agree with a plain linear scan
/// for every input; `Simd` in particular is required (spec.md §4.1) to
/// return the same index as `Binary` for every input.
pub trait SearchStrategy<K, Cmp: Comparator<K>> {
    /// First index `i` with `!cmp.lt(&keys[i], needle)`, or `len` if none.
    fn lower_bound(keys: &[K], len: usize, needle: &K, cmp: &Cmp) -> usize;

    /// First index `i` with `cmp.lt(needle, &keys[i])`, or `len` if none.
    fn upper_bound(keys: &[K], len: usize, needle: &K, cmp: &Cmp) -> usize {
        let lb = Self::lower_bound(keys, len, needle, cmp);
        let mut i = lb;
        while i < len && !cmp.lt(needle, &keys[i]) {
            i += 1;
        }
        i
    }

    /// Index of the element equal to `needle`, if present.
    fn find(keys: &[K], len: usize, needle: &K, cmp: &Cmp) -> Option<usize> {
        let lb = Self::lower_bound(keys, len, needle, cmp);
        if lb < len && cmp.eq(&keys[lb], needle) {
            Some(lb)
        } else {
            None
        }
    }
}

/// Scans `keys[0..len)` left to right until the first element not ordered
/// before `needle`. Best for small nodes where branch prediction beats the
/// pointer-chasing of a binary search.
pub struct Linear;

impl<K, Cmp: Comparator<K>> SearchStrategy<K, Cmp> for Linear {
    #[inline]
    fn lower_bound(keys: &[K], len: usize, needle: &K, cmp: &Cmp) -> usize {
        for i in 0..len {
            if !cmp.lt(&keys[i], needle) {
                return i;
            }
        }
        len
    }
}

/// Classic branchless-ish binary search over `keys[0..len)`.
pub struct Binary;

impl<K, Cmp: Comparator<K>> SearchStrategy<K, Cmp> for Binary {
    #[inline]
    fn lower_bound(keys: &[K], len: usize, needle: &K, cmp: &Cmp) -> usize {
        let mut lo = 0usize;
        let mut hi = len;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.lt(&keys[mid], needle) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Vectorized lower-bound over the key column (spec.md §4.1).
///
/// Only available for `K: SimdKey` (`i32`, `u32`, `i64`, `u64`, `f32`,
/// `f64` — see [`crate::simd_keys`]); instantiating `DenseMap<_, _, _, _,
/// Simd>` with any other key type fails to compile because this impl
/// simply doesn't exist for it, which is exactly spec.md §4.1's "otherwise
/// compile error" requirement without needing a separate static assertion.
///
/// `Simd` always orders by `K`'s own natural order, not `Cmp` — broadcast
/// hardware compares only understand the type's native representation.
/// Pairing `Simd` with a `Cmp` that reorders keys relative to their
/// natural order is a logic error, exactly as in the original
/// implementation this crate is modeled on.
pub struct Simd;

impl<K: SimdKey, Cmp: Comparator<K>> SearchStrategy<K, Cmp> for Simd {
    #[inline]
    fn lower_bound(keys: &[K], len: usize, needle: &K, _cmp: &Cmp) -> usize {
        K::simd_lower_bound(keys, len, *needle)
    }
}
