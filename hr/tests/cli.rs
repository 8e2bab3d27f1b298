//! Command-line smoke tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn hr(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hr").expect("Failed to find hr binary");
    cmd.env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .current_dir(home.path());
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    hr(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hub"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("value"));
}

#[test]
fn test_call_without_hub_fails() {
    let home = TempDir::new().unwrap();
    let socket = home.path().join("absent.sock");

    hr(&home)
        .arg("--socket")
        .arg(&socket)
        .args(["call", "hub-ping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect to hub"));
}

#[test]
fn test_invalid_json_is_rejected() {
    let home = TempDir::new().unwrap();
    let socket = home.path().join("absent.sock");

    hr(&home)
        .arg("--socket")
        .arg(&socket)
        .args(["emit", "ping", "--data", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid JSON"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = TempDir::new().unwrap();

    hr(&home)
        .args(["--config", "/nonexistent/hubrpc.yml", "call", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
