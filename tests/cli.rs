use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use tempfile::tempdir;

const PASSWORD: &str = "correct horse battery";

fn msgvault(store: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("msgvault");
    cmd.env("MSGVAULT_PASSWORD", PASSWORD)
        .env_remove("RUST_LOG")
        .arg("--store")
        .arg(store);
    cmd
}

#[test]
fn test_migrate_creates_current_store() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("store");

    msgvault(&store)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"persisted\": null"));

    msgvault(&store)
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("schema version 106"));

    assert!(store.join("msgvault.db").exists());
    assert!(store.join("keystore.json").exists());

    msgvault(&store)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema version 106 (current 106, 0 pending)"));
}

#[test]
fn test_missing_password_is_reported() {
    let temp = tempdir().unwrap();

    cargo_bin_cmd!("msgvault")
        .env_remove("MSGVAULT_PASSWORD")
        .arg("--store")
        .arg(temp.path())
        .arg("migrate")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("MSGVAULT_PASSWORD"));
}

#[test]
fn test_legacy_database_exits_with_unsupported_code() {
    let temp = tempdir().unwrap();
    std::fs::write(temp.path().join("legacy.db"), b"pre-store data").unwrap();

    msgvault(temp.path())
        .arg("migrate")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Unsupported store"));
}

#[test]
fn test_receipts_replace_through_cli() {
    let temp = tempdir().unwrap();
    let store = temp.path();

    for (device, received) in [("1", "1100"), ("2", "1500")] {
        msgvault(store)
            .args(["receipts", "add", "+15550001", "--device", device, "--sent", "1000"])
            .args(["--received", received, "--thread", "4"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Stored pending receipt"));
    }

    msgvault(store)
        .args(["receipts", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("+15550001.2  sent=1000 received=1500 thread=4"))
        .stdout(predicate::str::contains("received=1100").not());

    msgvault(store)
        .args(["receipts", "remove", "+15550001", "--sent", "1000"])
        .assert()
        .success();

    msgvault(store)
        .args(["receipts", "remove", "+15550001", "--sent", "1000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No pending receipt"));
}

#[test]
fn test_snapshots_empty_for_new_store() {
    let temp = tempdir().unwrap();

    msgvault(temp.path()).arg("migrate").assert().success();
    msgvault(temp.path())
        .args(["snapshots", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No snapshots."));
    msgvault(temp.path())
        .args(["snapshots", "verify"])
        .assert()
        .success();
}

#[test]
fn test_config_changes_are_persisted() {
    let temp = tempdir().unwrap();

    msgvault(temp.path())
        .args(["config", "--keep-snapshots", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"keep_snapshots\": 5"));

    msgvault(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"keep_snapshots\": 5"));

    msgvault(temp.path())
        .args(["config", "--keep-snapshots", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("keep_snapshots"));
}
