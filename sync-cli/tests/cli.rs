//! Command-line behavior of the sync-cli binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("sync-cli").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

#[test]
fn init_then_status() {
    let dir = tempdir().unwrap();

    cli(dir.path())
        .args(["init", "--name", "Laptop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Device initialized"));

    cli(dir.path())
        .args(["status", "--relay", "ws://relay.test:8080/ws"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Laptop"))
        .stdout(predicate::str::contains("ws://relay.test:8080/ws"));
}

#[test]
fn add_then_list() {
    let dir = tempdir().unwrap();
    cli(dir.path())
        .args(["init", "--name", "Laptop"])
        .assert()
        .success();

    cli(dir.path())
        .args(["add", "https://example.com/a", "--relevance", "0.8"])
        .assert()
        .success();

    cli(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("https://example.com/a"))
        .stdout(predicate::str::contains("0.80"));
}

#[test]
fn pair_requires_a_mode() {
    let dir = tempdir().unwrap();
    cli(dir.path())
        .arg("pair")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--create or --join"));
}

#[test]
fn inspect_rejects_garbage() {
    let dir = tempdir().unwrap();
    cli(dir.path())
        .args(["inspect", "%%%"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid pairing payload"));
}
