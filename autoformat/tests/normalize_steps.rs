//! Normalization runner behavior: ordering, crash classification, idempotence.

use std::fs;

use autoformat::io::config::PipelineConfig;
use autoformat::io::normalize::{NormalizeError, Normalizer, ToolchainNormalizer};
use autoformat::test_support::{TestRepo, local_test_config, sh, workspace_at};

fn normalizer(cfg: &PipelineConfig) -> ToolchainNormalizer {
    ToolchainNormalizer::from_config(cfg)
}

#[test]
fn formatter_runs_before_linter() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.formatter.command = sh("echo format >> order.log");
    cfg.linter.command = sh("echo lint >> order.log");

    let report = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect("normalize");

    assert_eq!(repo.read("order.log").expect("log"), "format\nlint\n");
    let names: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["formatter", "linter"]);
}

#[test]
fn linter_fixes_on_a_dirty_tree() {
    let repo = TestRepo::new().expect("repo");
    repo.write("a.txt", "base\n").expect("write");
    repo.commit_all("add a.txt").expect("commit");
    repo.write("a.txt", "uncommitted  \n").expect("modify");
    let mut cfg = local_test_config();
    cfg.linter.command = sh("git diff --quiet && exit 9; echo fixed > lint.txt");

    normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect("normalize");
    assert_eq!(repo.read("lint.txt").expect("lint"), "fixed\n");
}

#[test]
fn untolerated_exit_is_a_crash_and_stops_later_steps() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.formatter.command = sh("echo 'internal error' >&2; exit 3");
    cfg.linter.command = sh("touch linter-ran");

    let err = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect_err("crash");
    match &err {
        NormalizeError::Crash {
            step,
            status,
            stderr_tail,
        } => {
            assert_eq!(step, "formatter");
            assert_eq!(status, "exit code 3");
            assert!(stderr_tail.contains("internal error"));
        }
        other => panic!("expected crash, got {other}"),
    }
    assert!(!repo.root().join("linter-ran").exists());
}

#[test]
fn killed_tool_is_a_crash() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.linter.command = sh("kill -9 $$");

    let err = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect_err("signal");
    assert!(matches!(err, NormalizeError::Crash { ref status, .. } if status == "signal"));
    assert_eq!(err.step(), "linter");
}

#[test]
fn missing_tool_is_a_spawn_failure() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.formatter.command = vec!["autoformat-no-such-formatter".to_string()];

    let err = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect_err("spawn");
    assert!(matches!(err, NormalizeError::Spawn { .. }));
}

#[test]
fn slow_tool_times_out() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.step_timeout_secs = 1;
    cfg.formatter.command = sh("exec sleep 10");

    let err = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect_err("timeout");
    assert!(matches!(err, NormalizeError::Timeout { timeout_secs: 1, .. }));
}

#[test]
fn disabled_step_is_skipped() {
    let repo = TestRepo::new().expect("repo");
    let mut cfg = local_test_config();
    cfg.linter.command = sh("touch linter-ran");
    cfg.linter.enabled = false;

    let report = normalizer(&cfg)
        .normalize(&workspace_at(repo.root()).expect("workspace"))
        .expect("normalize");
    assert!(report.steps[1].skipped);
    assert_eq!(report.steps[1].exit_code, None);
    assert!(!repo.root().join("linter-ran").exists());
}

#[test]
fn second_normalization_changes_nothing() {
    let repo = TestRepo::new().expect("repo");
    repo.write("a.txt", "one \ntwo\t\t\n").expect("write");
    repo.write("b.txt", "clean\n").expect("write");
    let cfg = local_test_config();
    let workspace = workspace_at(repo.root()).expect("workspace");
    let runner = normalizer(&cfg);

    runner.normalize(&workspace).expect("first");
    let after_first = (
        repo.read("a.txt").expect("a"),
        repo.read("b.txt").expect("b"),
        repo.git().status_porcelain().expect("status"),
    );
    assert_eq!(after_first.0, "one\ntwo\n");

    runner.normalize(&workspace).expect("second");
    let after_second = (
        repo.read("a.txt").expect("a"),
        repo.read("b.txt").expect("b"),
        repo.git().status_porcelain().expect("status"),
    );
    assert_eq!(after_first, after_second);
    assert!(
        !fs::read_dir(repo.root())
            .expect("read dir")
            .any(|entry| entry.expect("entry").file_name().to_string_lossy().ends_with(".tmp")),
        "formatter leaves no temp files"
    );
}
