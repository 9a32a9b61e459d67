//! End-to-end tests against the public crate surface: encoded byte-array
//! keys, the SIMD search mode, and sharing a pool pair across two trees —
//! the things a unit test living inside `btree.rs` can't exercise because
//! they cross module boundaries.

use fast_containers::btree::BTree;
use fast_containers::comparator::DefaultComparator;
use fast_containers::keys::{composite_key_16, encode_i32, encode_i64, FixedBytes};
use fast_containers::policy_allocator::{two_pool_allocator, TwoPoolPolicy};
use fast_containers::search::{Binary, Simd};

type ByteKeySimdTree = BTree<FixedBytes<4>, i32, 8, 8, DefaultComparator<FixedBytes<4>>, Simd, TwoPoolPolicy>;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

type IntTree = BTree<i32, i32, 8, 8, DefaultComparator<i32>, Binary, TwoPoolPolicy>;
type SimdTree = BTree<i32, i32, 16, 16, DefaultComparator<i32>, Simd, TwoPoolPolicy>;
type ByteKeyTree = BTree<FixedBytes<4>, i32, 8, 8, DefaultComparator<FixedBytes<4>>, Binary, TwoPoolPolicy>;
type CompositeKeyTree =
    BTree<FixedBytes<16>, i32, 8, 8, DefaultComparator<FixedBytes<16>>, Binary, TwoPoolPolicy>;

#[test]
fn scenario_a_sequential_insert_and_iterate() {
    let mut t = IntTree::new().unwrap();
    for k in 1..=5 {
        t.insert(k, k * 10).unwrap();
    }
    let collected: Vec<(i32, i32)> = t.iter().map(|(&k, &v)| (k, v)).collect();
    assert_eq!(collected, vec![(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)]);
    assert_eq!(t.len(), 5);
}

#[test]
fn scenario_b_erase_by_key_and_reverify_survivors() {
    let mut t = IntTree::new().unwrap();
    for k in 1..=10 {
        t.insert(k, k * 10).unwrap();
    }
    t.remove(&5);
    assert_eq!(t.len(), 9);
    assert!(t.find(&5).is_end());
    for k in 1..=10 {
        if k == 5 {
            continue;
        }
        assert_eq!(t.get(&k), Some(&(k * 10)));
    }
}

#[test]
fn encoded_i32_keys_preserve_numeric_order_through_the_tree() {
    type EncodedTree = ByteKeyTree;
    let mut t = EncodedTree::new().unwrap();
    let values = [5, -3, 0, 100, -100, 42, -1];
    for &v in &values {
        t.insert(encode_i32(v), v).unwrap();
    }
    let mut sorted = values;
    sorted.sort();
    let collected: Vec<i32> = t.values().copied().collect();
    assert_eq!(collected, sorted);
}

#[test]
fn composite_keys_order_lexicographically_through_the_tree() {
    let mut t = CompositeKeyTree::new().unwrap();
    let pairs = [(2, 5), (1, 9), (2, 1), (1, 1), (3, 0)];
    for &(a, b) in &pairs {
        let key = composite_key_16(encode_i64(a), encode_i64(b));
        t.insert(key, a * 100 + b).unwrap();
    }
    let collected: Vec<i32> = t.values().copied().collect();
    assert_eq!(collected, vec![101, 109, 201, 205, 300]);
}

#[test]
fn byte_key_tree_compiles_and_works_under_simd_mode() {
    // spec.md §4.1: `SM = Simd` must compile and behave correctly for
    // fixed-size byte-array keys, not just the six numeric types.
    let mut t = ByteKeySimdTree::new().unwrap();
    let values = [5, -3, 0, 100, -100, 42, -1];
    for &v in &values {
        t.insert(encode_i32(v), v).unwrap();
    }
    let mut sorted = values;
    sorted.sort();
    let collected: Vec<i32> = t.values().copied().collect();
    assert_eq!(collected, sorted);
    t.check_invariants().unwrap();
}

#[test]
fn simd_search_mode_matches_binary_across_a_full_insert_erase_cycle() {
    let mut simd_tree = SimdTree::new().unwrap();
    let mut binary_tree: BTree<i32, i32, 16, 16, DefaultComparator<i32>, Binary, TwoPoolPolicy> =
        BTree::new().unwrap();

    let mut rng = StdRng::seed_from_u64(0x51_5_1_D);
    let mut keys: Vec<i32> = (0..500).map(|i| i % 1000).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        simd_tree.insert(k, k).unwrap();
        binary_tree.insert(k, k).unwrap();
    }
    simd_tree.check_invariants().unwrap();
    binary_tree.check_invariants().unwrap();
    assert_eq!(
        simd_tree.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
        binary_tree.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
    );

    for &k in keys.iter().step_by(2) {
        simd_tree.remove(&k);
        binary_tree.remove(&k);
    }
    simd_tree.check_invariants().unwrap();
    binary_tree.check_invariants().unwrap();
    assert_eq!(
        simd_tree.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
        binary_tree.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>(),
    );
}

#[test]
fn two_trees_can_share_one_pool_pair() {
    let allocator = two_pool_allocator(1 << 20, 1 << 20, false).unwrap();
    let mut a: IntTree = BTree::with_allocator(allocator.clone(), DefaultComparator::new()).unwrap();
    let mut b: IntTree = BTree::with_allocator(allocator, DefaultComparator::new()).unwrap();

    for k in 0..50 {
        a.insert(k, k).unwrap();
    }
    for k in 100..150 {
        b.insert(k, k).unwrap();
    }
    assert_eq!(a.len(), 50);
    assert_eq!(b.len(), 50);
    assert!(a.get(&120).is_none());
    assert!(b.get(&20).is_none());
}

#[test]
fn swap_between_leaf_root_and_internal_root_tree_is_a_clean_three_way_exchange() {
    // Regression test for the "Open Question" in spec.md §9: swap must be a
    // full three-way exchange through the tagged root, not a cross-assign
    // that corrupts one side when the two trees differ in root kind.
    let mut small = IntTree::new().unwrap();
    small.insert(1, 10).unwrap();

    let mut large = IntTree::new().unwrap();
    for k in 0..200 {
        large.insert(k, k).unwrap();
    }
    large.check_invariants().unwrap();

    small.swap(&mut large);

    small.check_invariants().unwrap();
    large.check_invariants().unwrap();
    assert_eq!(small.len(), 200);
    assert_eq!(large.len(), 1);
    assert_eq!(large.get(&1), Some(&10));
    for k in 0..200 {
        assert_eq!(small.get(&k), Some(&k));
    }
}
