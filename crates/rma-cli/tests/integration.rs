#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn rma(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rma").unwrap();
    cmd.current_dir(dir.path())
        .env("ENVIRONMENT", "PROD")
        .env_remove("AGENT_RUNTIME_CONFIG");
    cmd
}

// ---------------------------------------------------------------------------
// rma --help
// ---------------------------------------------------------------------------

#[test]
fn help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    rma(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("session-manager"))
        .stdout(predicate::str::contains("orchestrator"))
        .stdout(predicate::str::contains("chat"));
}

// ---------------------------------------------------------------------------
// rma config
// ---------------------------------------------------------------------------

#[test]
fn config_check_accepts_builtin() {
    let dir = TempDir::new().unwrap();
    rma(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("built-in: ok"))
        .stdout(predicate::str::contains("PLANNER_AGENT"));
}

#[test]
fn config_check_accepts_valid_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agents.yaml");
    std::fs::write(
        &path,
        "agents:\n  - agent_name: PLANNER_AGENT\n    instructions: plan\n  - agent_name: FALLBACK_AGENT\n    instructions: help\n  - agent_name: FINAL_ANSWER_GENERATOR_AGENT\n    instructions: answer\n",
    )
    .unwrap();
    rma(&dir)
        .args(["config", "check"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ok (3 agents"));
}

#[test]
fn config_check_rejects_missing_planner() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agents.yaml");
    std::fs::write(
        &path,
        "agents:\n  - agent_name: FALLBACK_AGENT\n    instructions: help\n",
    )
    .unwrap();
    rma(&dir)
        .args(["config", "check"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("error(s) in runtime config"));
}

#[test]
fn config_check_reports_unreadable_file() {
    let dir = TempDir::new().unwrap();
    rma(&dir)
        .args(["config", "check", "does-not-exist.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load runtime config"));
}

#[test]
fn config_show_prints_yaml() {
    let dir = TempDir::new().unwrap();
    rma(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("agent_name: FALLBACK_AGENT"));
}

// ---------------------------------------------------------------------------
// rma chat
// ---------------------------------------------------------------------------

#[test]
fn chat_rejects_unsupported_url_scheme() {
    let dir = TempDir::new().unwrap();
    rma(&dir)
        .args(["chat", "--url", "ftp://example.com", "-m", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
