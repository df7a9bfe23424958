use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("gif-picker").expect("binary built");
    // Keep sessions independent of the developer's config and log settings.
    cmd.arg("--config")
        .arg("/nonexistent/gif-picker.yaml")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn prints_version() {
    Command::cargo_bin("gif-picker")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("gif-picker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("gif-picker").and(predicate::str::contains("--search")));
}

#[test]
fn default_session_lists_trending() {
    bin()
        .assert()
        .success()
        .stdout(predicate::str::starts_with("section: trending"))
        .stdout(predicate::str::contains("featured-0"));
}

#[test]
fn search_session_as_json() {
    let output = bin()
        .args(["--search", "cats", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["snapshot"]["query"]["search_text"], "cats");
    assert_eq!(value["snapshot"]["item_count"], 40);
    assert_eq!(value["snapshot"]["visible"][0]["id"], "cats-0");
}

#[test]
fn select_reports_then_closes() {
    bin()
        .args(["--section", "thumbs_up", "--select", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "selected thumbs-up-2 https://media.example.test/thumbs-up/2/full.mp4",
        ))
        .stdout(predicate::str::contains("close requested"));
}

#[test]
fn scrolling_moves_the_window() {
    bin()
        .args(["--scroll", "2000", "--viewport", "400"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scroll: 2000/"));
}

#[test]
fn rejects_unknown_section() {
    bin()
        .args(["--section", "grumpy"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown section \"grumpy\""));
}

#[test]
fn rejects_missing_value() {
    bin()
        .arg("--scroll")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--scroll expects a value"));
}

#[test]
fn config_file_changes_page_size() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "picker:\n  first_page_size: 5\n  page_size: 5\n").unwrap();
    let output = Command::cargo_bin("gif-picker")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .args(["--json", "--viewport", "100"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let count = value["snapshot"]["item_count"].as_u64().unwrap();
    assert_eq!(count % 5, 0);
    assert!(count >= 5);
}
