use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with settings isolated from the developer's machine
fn unique_locks(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("unique-locks").unwrap();
    cmd.env("UNIQUE_LOCKS_CONFIG", dir.path().join("missing.toml"))
        .env_remove("UNIQUE_LOCKS_REDIS_URL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_keys_lists_family() {
    let dir = TempDir::new().unwrap();
    unique_locks(&dir)
        .args(["keys", "uniquejobs:abc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("uniquejobs:abc:EXISTS"))
        .stdout(predicate::str::contains("uniquejobs:abc:AVAILABLE"))
        .stdout(predicate::str::contains("uniquejobs:abc:CHANGELOG"))
        .stdout(predicate::str::contains(":RUN").not());
}

#[test]
fn test_keys_run_lock_as_json() {
    let dir = TempDir::new().unwrap();
    let output = unique_locks(&dir)
        .args(["keys", "uniquejobs:abc", "--run", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["digest"], "uniquejobs:abc:RUN");
    assert_eq!(value["locked"], "uniquejobs:abc:RUN:LOCKED");
    assert_eq!(value["grabbed"], "uniquejobs:abc:RUN:GRABBED");
}

#[test]
fn test_invalid_redis_url_is_reported() {
    let dir = TempDir::new().unwrap();
    unique_locks(&dir)
        .args(["--redis-url", "not-a-redis-url", "status", "uniquejobs:abc", "--job-id", "jid"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_broken_settings_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[defaults\nlock_ttl = ").unwrap();

    unique_locks(&dir)
        .arg("--config")
        .arg(&path)
        .args(["delete", "uniquejobs:abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration file"));
}

#[test]
fn test_missing_subcommand_shows_usage() {
    let dir = TempDir::new().unwrap();
    unique_locks(&dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
