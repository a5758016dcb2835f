use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

fn validate_pma(p: &PackedMemoryArray) {
    let cap = p.storage.segment_capacity();
    let segments = p.storage.segments();
    assert_eq!(p.index.len(), segments, "index must cover every segment");
    assert_eq!(p.detector.segments(), segments, "heat must cover every segment");
    assert_eq!(p.bounds.root_height(), tree_height(segments));

    let mut total = 0usize;
    let mut prev: Option<i64> = None;
    let mut last_occupied = None;
    for s in 0..segments {
        let keys = p.storage.keys(s);
        assert!(keys.len() <= cap, "segment {s} over capacity");
        assert_eq!(p.storage.values(s).len(), keys.len());
        for &k in keys {
            if let Some(prev) = prev {
                assert!(prev < k, "keys out of order: {prev} then {k}");
            }
            prev = Some(k);
            assert_eq!(p.index.locate(k), s, "index sends {k} to the wrong segment");
        }
        if !keys.is_empty() {
            last_occupied = Some(s);
        }
        total += keys.len();
    }
    assert_eq!(total, p.len(), "segment sizes must add up to the length");

    // Separators are non-decreasing and an empty segment borrows the next
    // occupied segment's minimum.
    let mut next = i64::MAX;
    for s in (0..segments).rev() {
        let sep = p.index.separator(s);
        match p.storage.min_key(s) {
            Some(min) => assert_eq!(sep, min, "separator of segment {s}"),
            None => assert_eq!(sep, next, "separator of empty segment {s}"),
        }
        next = sep;
    }
    if let Some(last) = last_occupied {
        assert_eq!(p.index.locate(i64::MAX), last);
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 60)]
    Insert(#[proptest(strategy = "-2000i64..2000")] i64, i64),
    #[proptest(weight = 15)]
    Find(#[proptest(strategy = "-2100i64..2100")] i64),
    #[proptest(weight = 10)]
    Sum(
        #[proptest(strategy = "-2100i64..2100")] i64,
        #[proptest(strategy = "-2100i64..2100")] i64,
    ),
    #[proptest(weight = 4)]
    Load(
        #[proptest(strategy = "prop::collection::vec((-2000i64..2000, any::<i64>()), 0..80)")]
        Vec<(i64, i64)>,
    ),
    #[proptest(weight = 1)]
    Build,
}

fn config_strategy() -> impl Strategy<Value = Config> {
    (2u32..=6, 0u32..=3, 0usize..64, any::<bool>()).prop_map(
        |(cap_log, seg_log, history_capacity, rewiring)| Config {
            segment_capacity: 1 << cap_log,
            initial_segments: 1 << seg_log,
            history_capacity,
            rewiring,
            ..Config::default()
        },
    )
}

fn model_sum(m: &BTreeMap<i64, i64>, min: i64, max: i64) -> SumResult {
    let mut r = SumResult::default();
    if min > max {
        return r;
    }
    for (&k, &v) in m.range(min..=max) {
        if r.num_elements == 0 {
            r.first_key = k;
        }
        r.last_key = k;
        r.num_elements += 1;
        r.sum_keys = r.sum_keys.wrapping_add(k);
        r.sum_values = r.sum_values.wrapping_add(v);
    }
    r
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(
        config in config_strategy(),
        ops in prop::collection::vec(any::<Op>(), 0..=1500),
    ) {
        let mut p = PackedMemoryArray::with_config(config).unwrap();
        let mut m: BTreeMap<i64, i64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    prop_assert_eq!(p.insert(k, v), m.insert(k, v));
                }
                Op::Find(k) => {
                    prop_assert_eq!(p.find(k), m.get(&k).copied());
                }
                Op::Sum(a, b) => {
                    prop_assert_eq!(p.sum(a, b), model_sum(&m, a, b));
                    let got: Vec<(i64, i64)> = p.range(a, b).collect();
                    let expected: Vec<(i64, i64)> = if a <= b {
                        m.range(a..=b).map(|(&k, &v)| (k, v)).collect()
                    } else {
                        Vec::new()
                    };
                    prop_assert_eq!(got, expected);
                }
                Op::Load(batch) => {
                    p.load(&batch);
                    for (k, v) in batch {
                        m.insert(k, v);
                    }
                }
                Op::Build => p.build(),
            }

            prop_assert_eq!(p.len(), m.len());
        }

        validate_pma(&p);
        let got: Vec<(i64, i64)> = p.iter().collect();
        let expected: Vec<(i64, i64)> = m.iter().map(|(&k, &v)| (k, v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_insert_order_does_not_matter(
        keys in prop::collection::hash_set(any::<i64>(), 0..600),
        seed in any::<u64>(),
    ) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut keys: Vec<i64> = keys.into_iter().collect();
        keys.sort_unstable();
        let sorted = keys.clone();
        keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));

        let mut p = PackedMemoryArray::new();
        for &k in &keys {
            p.insert(k, k.wrapping_mul(3));
        }
        validate_pma(&p);
        prop_assert!(p.iter().map(|(k, _)| k).eq(sorted.iter().copied()));
        if let (Some(&lo), Some(&hi)) = (sorted.first(), sorted.last()) {
            prop_assert_eq!(p.first().unwrap().0, lo);
            prop_assert_eq!(p.last().unwrap().0, hi);
            prop_assert_eq!(p.sum(i64::MIN, i64::MAX).num_elements, sorted.len() as u64);
        }
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_segments() {
    // Segments of four slots overflow after a handful of inserts, so every
    // order exercises rebalances and growth.
    let keys: Vec<i64> = vec![-3, 0, 1, 7, 8, 20, 21];
    let config = Config {
        segment_capacity: 4,
        history_capacity: 4,
        ..Config::default()
    };

    for_each_permutation(&keys, |perm| {
        let mut p = PackedMemoryArray::with_config(config.clone()).unwrap();
        let mut m: BTreeMap<i64, i64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as i64;
            assert_eq!(p.insert(k, v), m.insert(k, v));
            validate_pma(&p);
        }

        let got: Vec<(i64, i64)> = p.iter().collect();
        let expected: Vec<(i64, i64)> = m.iter().map(|(&k, &v)| (k, v)).collect();
        assert_eq!(got, expected);
    });
}

#[test]
fn exhaustive_load_split_small_set() {
    // Every way of splitting a key set between single inserts and one load.
    let keys: Vec<i64> = (0..10).map(|k| k * 5).collect();
    for mask in 0u32..(1 << keys.len()) {
        let config = Config {
            segment_capacity: 4,
            ..Config::default()
        };
        let mut p = PackedMemoryArray::with_config(config).unwrap();
        let mut batch = Vec::new();
        for (i, &k) in keys.iter().enumerate() {
            if mask & (1 << i) != 0 {
                p.insert(k, k);
            } else {
                batch.push((k, k));
            }
        }
        p.load(&batch);
        validate_pma(&p);
        assert!(p.iter().map(|(k, _)| k).eq(keys.iter().copied()));
    }
}
