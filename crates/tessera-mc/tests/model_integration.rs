//! End-to-end exploration of the built-in models.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tessera_mc::{CheckerKind, ExploreConfig, Explorer, Model, Settings};
use tessera_models::{by_name, Bakery, Counters, ModelArgs, Ring};
use tessera_store::{BackendKind, StoreConfig};

fn config(threads: usize, storage: BackendKind) -> ExploreConfig {
    ExploreConfig {
        threads,
        storage,
        store: StoreConfig::small(),
        ..Default::default()
    }
}

fn explore<M: Model>(model: M, config: ExploreConfig) -> (u64, u64, Explorer<M>) {
    let mut explorer = Explorer::new(model, config).unwrap();
    let outcome = explorer.run().unwrap();
    assert!(outcome.is_complete(), "run did not complete: {outcome:?}");
    let summary = outcome.summary();
    (summary.states, summary.transitions, explorer)
}

#[test]
fn bakery_two_procs_is_mutually_exclusive() {
    let (states, transitions, explorer) = explore(Bakery::new(2, 4), config(1, BackendKind::Cchm));
    assert_eq!(states, 48);
    assert_eq!(transitions, 72);
    assert_eq!(explorer.model().critical_overlaps(), 0);
}

#[test]
fn bakery_counts_grow_with_ticket_bound() {
    let expected = [(1, 12, 18), (2, 24, 36), (3, 36, 54), (6, 72, 108)];
    for (max_ticket, states, transitions) in expected {
        let (s, t, _) = explore(Bakery::new(2, max_ticket), config(2, BackendKind::Cchm));
        assert_eq!((s, t), (states, transitions), "max_ticket={max_ticket}");
    }
}

#[test]
fn bakery_three_procs() {
    let (states, transitions, explorer) = explore(Bakery::new(3, 3), config(4, BackendKind::Cchm));
    assert_eq!(states, 140);
    assert_eq!(transitions, 273);
    assert_eq!(explorer.model().critical_overlaps(), 0);
}

#[test]
fn bakery_one_and_four_threads_agree() {
    let (s1, t1, _) = explore(Bakery::new(3, 5), config(1, BackendKind::Cchm));
    let (s4, t4, _) = explore(Bakery::new(3, 5), config(4, BackendKind::Cchm));
    assert_eq!((s1, t1), (260, 507));
    assert_eq!((s1, t1), (s4, t4));
}

#[test]
fn every_backend_agrees_on_bakery() {
    for kind in BackendKind::ALL {
        let (states, transitions, explorer) = explore(Bakery::new(2, 5), config(3, kind));
        assert_eq!((states, transitions), (60, 90), "backend {kind}");
        assert_eq!(explorer.model().critical_overlaps(), 0);
    }
}

#[test]
fn every_checker_agrees_on_counters() {
    for checker in CheckerKind::ALL {
        let cfg = ExploreConfig {
            checker,
            ..config(4, BackendKind::TreeCchm)
        };
        let (states, transitions, _) = explore(Counters::new(3, 3), cfg);
        assert_eq!((states, transitions), (64, 144), "checker {checker}");
    }
}

#[test]
fn counters_grid_matches_closed_form() {
    for (n, max) in [(1, 7), (2, 5), (4, 2), (5, 1)] {
        let model = Counters::new(n, max);
        let expected = (model.expected_states(), model.expected_transitions());
        let (states, transitions, _) = explore(model, config(4, BackendKind::DTree));
        assert_eq!((states, transitions), expected, "n={n} max={max}");
    }
}

#[test]
fn ring_visits_every_configuration() {
    let (states, transitions, _) = explore(Ring::new(3, 2), config(2, BackendKind::TreeMod));
    assert_eq!((states, transitions), (24, 48));

    let ring = Ring::new(4, 3);
    let expected = ring.expected_states();
    let (states, transitions, _) = explore(ring, config(4, BackendKind::StdMap));
    assert_eq!(states, expected);
    assert_eq!(transitions, 2 * expected);
}

#[test]
fn hook_sees_every_edge_once_per_report() {
    let edges = Arc::new(Mutex::new(Vec::new()));
    let mut explorer = Explorer::new(Counters::new(2, 2), config(4, BackendKind::Cchm)).unwrap();
    {
        let edges = Arc::clone(&edges);
        explorer.set_transition_hook(move |src, label, dst| {
            edges.lock().unwrap().push((src, label, dst));
        });
    }
    let summary = explorer.run().unwrap().into_summary();
    let edges = edges.lock().unwrap();
    assert_eq!(edges.len() as u64, summary.transitions);
    let distinct: HashSet<_> = edges.iter().collect();
    assert_eq!(distinct.len(), edges.len());

    let rendered: HashSet<_> = edges
        .iter()
        .map(|&(_, label, _)| explorer.describe_label(label))
        .collect();
    assert_eq!(rendered, HashSet::from(["inc(0)".to_string(), "inc(1)".to_string()]));
}

#[test]
fn registry_models_run_from_settings() {
    let mut settings = Settings::new();
    settings.apply("threads=2").unwrap();
    settings.apply("storage=treedbs_stdmap").unwrap();
    settings.apply("root_log2=12").unwrap();
    settings.apply("data_log2=12").unwrap();
    settings.apply("arena_log2=16").unwrap();

    let args = ModelArgs::parse(&["procs=2", "max_ticket=3"]).unwrap();
    let model = by_name("bakery", &args).unwrap();
    let (states, transitions, _) = explore(model, settings.explore_config().unwrap());
    assert_eq!((states, transitions), (36, 54));
}
