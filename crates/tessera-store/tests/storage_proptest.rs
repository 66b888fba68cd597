//! Property tests: every backend behaves like a map from content to id.

use std::collections::HashMap;

use proptest::prelude::*;
use tessera_store::{
    build_storage, BackendKind, Delta, Slot, StateId, StateStorage, StoreConfig,
};

fn config() -> StoreConfig {
    StoreConfig::small().with_chunks(2, 3)
}

fn vectors() -> impl Strategy<Value = Vec<Vec<Slot>>> {
    prop::collection::vec(prop::collection::vec(0u32..4, 0..20), 1..40)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn ids_agree_with_content_equality(states in vectors()) {
        for kind in BackendKind::ALL {
            let store = build_storage(kind, &config()).unwrap();
            let mut oracle: HashMap<Vec<Slot>, StateId> = HashMap::new();
            for data in &states {
                let ins = store.insert(data, true);
                match oracle.get(data) {
                    Some(&id) => {
                        prop_assert!(!ins.inserted, "{}: duplicate reported new", kind);
                        prop_assert_eq!(ins.state, id);
                    }
                    None => {
                        prop_assert!(ins.inserted, "{}: new content reported old", kind);
                        prop_assert!(!oracle.values().any(|&v| v == ins.state));
                        oracle.insert(data.clone(), ins.state);
                    }
                }
                prop_assert_eq!(ins.state.length(), data.len());
                prop_assert_eq!(store.determine_length(ins.state), data.len());
            }
            for (data, &id) in &oracle {
                let got = store.get(id, true);
                prop_assert_eq!(got.as_slice(), &data[..], "{}", kind);
                prop_assert_eq!(store.find(data, true), id);
            }
        }
    }

    #[test]
    fn delta_insert_matches_full_insert(
        base in prop::collection::vec(0u32..100, 0..24),
        offset in 0usize..28,
        patch in prop::collection::vec(0u32..100, 0..6),
    ) {
        let mut expected = base.clone();
        Delta::new(offset, &patch).apply_to(&mut expected);

        for kind in BackendKind::ALL {
            let store = build_storage(kind, &config()).unwrap();
            let base_id = store.insert(&base, true).state;
            let via_delta = store.insert_delta(base_id, &Delta::new(offset, &patch), true);
            let got = store.get(via_delta.state, true);
            prop_assert_eq!(got.as_slice(), &expected[..], "{}", kind);

            let mut cache = store.thread_init(0);
            let cached = store.insert_delta_cached(&mut cache, base_id, &Delta::new(offset, &patch), true);
            prop_assert_eq!(cached.state, via_delta.state);

            let full = store.insert(&expected, true);
            prop_assert!(!full.inserted, "{}: delta result not deduplicated", kind);
            prop_assert_eq!(full.state, via_delta.state);
        }
    }

    #[test]
    fn partial_reads_match_full_reads(
        data in prop::collection::vec(any::<u32>(), 1..40),
        a in any::<prop::sample::Index>(),
        b in any::<prop::sample::Index>(),
    ) {
        let (lo, hi) = {
            let (x, y) = (a.index(data.len() + 1), b.index(data.len() + 1));
            (x.min(y), x.max(y))
        };
        for kind in BackendKind::ALL {
            let store = build_storage(kind, &config()).unwrap();
            let id = store.insert(&data, true).state;
            let mut out = vec![0; hi - lo];
            prop_assert!(store.get_partial(id, lo, &mut out, true), "{}", kind);
            prop_assert_eq!(&out[..], &data[lo..hi], "{}", kind);

            let mut past = vec![0; data.len() - lo + 1];
            prop_assert!(!store.get_partial(id, lo, &mut past, true));
        }
    }

    #[test]
    fn root_and_sub_content_stay_apart(data in prop::collection::vec(0u32..8, 0..12)) {
        for kind in BackendKind::ALL {
            let store = build_storage(kind, &config()).unwrap();
            let sub = store.insert(&data, false);
            let root = store.insert(&data, true);
            prop_assert!(sub.inserted, "{}", kind);
            prop_assert!(root.inserted, "{}", kind);
            let got_sub = store.get(sub.state, false);
            prop_assert_eq!(got_sub.as_slice(), &data[..]);
            let got_root = store.get(root.state, true);
            prop_assert_eq!(got_root.as_slice(), &data[..]);
            prop_assert!(store.get(root.state, true).is_root());
        }
    }
}

#[test]
fn tree_backends_compress_similar_states() {
    let config = StoreConfig::small().with_chunks(0, 16);
    let base: Vec<Slot> = (0..128).collect();
    let used = |kind: BackendKind| {
        let store = build_storage(kind, &config).unwrap();
        for i in 0..200u32 {
            let mut state = base.clone();
            state[(i % 128) as usize] = 1000 + i;
            assert!(store.insert(&state, true).inserted);
        }
        store.stats().bytes_used
    };

    let flat = used(BackendKind::Cchm);
    for kind in [BackendKind::TreeCchm, BackendKind::TreeMod, BackendKind::DTree] {
        let tree = used(kind);
        assert!(tree * 2 < flat, "{kind}: {tree} B vs cchm {flat} B");
    }
}

#[test]
fn concurrent_inserts_agree_on_every_backend() {
    use std::sync::Arc;
    use std::thread;

    for kind in BackendKind::ALL {
        let store: Arc<dyn StateStorage> = Arc::from(build_storage(kind, &config()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut cache = store.thread_init(0);
                    let base = store.insert(&[0; 9], true).state;
                    (0..300u32)
                        .map(|i| {
                            let ins = store.insert_delta_cached(
                                &mut cache,
                                base,
                                &Delta::new((i % 9) as usize, &[i / 9 + 1]),
                                true,
                            );
                            (ins.state, ins.inserted)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for i in 0..300 {
            let winners = results.iter().filter(|r| r[i].1).count();
            assert_eq!(winners, 1, "{kind}: delta {i} inserted {winners} times");
            assert!(results.iter().all(|r| r[i].0 == results[0][i].0));
        }
        // Base plus 300 distinct successors.
        assert_eq!(store.stats().root_entries, 301, "{kind}");
    }
}

/// Large enough tables for one state of 140k distinct slots on every backend.
fn long_config() -> StoreConfig {
    StoreConfig {
        root_log2: 8,
        data_log2: 18,
        arena_log2: 20,
        ..StoreConfig::small()
    }
    .with_chunks(2, 3)
}

#[test]
fn long_states_round_trip_on_every_backend() {
    let short: Vec<Slot> = vec![5, 6, 7];
    for len in [70_000u32, 140_000] {
        let long: Vec<Slot> = (0..len).collect();
        for kind in BackendKind::ALL {
            let store = build_storage(kind, &long_config()).unwrap();
            let before = store.insert(&short, true).state;
            let ins = store.insert(&long, true);
            assert!(ins.inserted, "{kind}");
            assert_eq!(ins.state.length(), long.len());
            assert_eq!(store.get(ins.state, true).as_slice(), long.as_slice(), "{kind}");
            assert_eq!(store.find(&long, true), ins.state, "{kind}");
            assert!(!store.insert(&long, true).inserted, "{kind}");

            let mut tail = [0u32; 4];
            let at = long.len() - 4;
            assert!(store.get_partial(ins.state, at, &mut tail, true), "{kind}");
            assert_eq!(&tail[..], &long[at..], "{kind}");

            let after = store.insert(&[8, 9], true).state;
            assert_eq!(store.get(after, true).as_slice(), &[8, 9], "{kind}");
            assert_eq!(store.get(before, true).as_slice(), short.as_slice(), "{kind}");
        }
    }
}

#[test]
fn partial_reads_stop_exactly_at_the_end() {
    let data: Vec<Slot> = (10..23).collect();
    for kind in BackendKind::ALL {
        let store = build_storage(kind, &config()).unwrap();
        let id = store.insert(&data, true).state;
        for offset in 0..=data.len() {
            let mut out = vec![0; data.len() - offset];
            assert!(store.get_partial(id, offset, &mut out, true), "{kind} @ {offset}");
            assert_eq!(&out[..], &data[offset..], "{kind} @ {offset}");

            let mut past = vec![0; data.len() - offset + 1];
            assert!(!store.get_partial(id, offset, &mut past, true), "{kind} @ {offset}");
        }
        let mut one = [0u32; 1];
        assert!(!store.get_partial(id, data.len(), &mut one, true), "{kind}");
        assert!(!store.get_partial(id, usize::MAX, &mut one, true), "{kind}");
        assert!(!store.get_partial(id, usize::MAX, &mut [], true), "{kind}");
        assert!(!store.get_partial(StateId::NOT_FOUND, 0, &mut [], true), "{kind}");
    }
}
