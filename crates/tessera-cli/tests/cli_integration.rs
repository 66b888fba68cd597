//! Runs the `tessera` binary end to end.

use std::process::{Command, Output};

fn tessera(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tessera"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn models_lists_everything() {
    let out = tessera(&["models"]);
    assert!(out.status.success());
    let text = stdout(&out);
    for name in ["bakery", "counters", "ring", "treedbs_cchm", "dtree", "multicore_bitbetter"] {
        assert!(text.contains(name), "missing {name} in:\n{text}");
    }
}

#[test]
fn run_bakery_reports_counts() {
    let out = tessera(&[
        "run",
        "bakery",
        "--threads",
        "2",
        "--storage",
        "treedbs_cchm",
        "-s",
        "root_log2=12",
        "-s",
        "data_log2=12",
        "--model-arg",
        "max_ticket=4",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = stdout(&out);
    assert!(text.contains("states:       48"), "{text}");
    assert!(text.contains("transitions:  72"), "{text}");
    assert!(text.contains("storage:      treedbs_cchm"), "{text}");
}

#[test]
fn run_with_state_limit_still_succeeds() {
    let out = tessera(&["run", "counters", "-s", "max_states=10", "-a", "n=4", "-a", "max=9"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("state limit reached"));
}

#[test]
fn bad_input_is_reported() {
    let out = tessera(&["run", "bakery", "-s", "colour=red"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown setting 'colour'"));

    let out = tessera(&["run", "philosophers"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown model"));

    let out = tessera(&["run", "ring", "--storage", "btree"]);
    assert_eq!(out.status.code(), Some(1));
}
