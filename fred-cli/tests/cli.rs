/*
    CLI tests - run the `fred` binary against real configuration files
*/

use std::process::Command;
use tempfile::tempdir;

fn fred() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fred"))
}

#[test]
fn test_init_then_check() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("node.toml");

    let status = fred().args(["init", "--output"]).arg(&path).status().unwrap();
    assert!(status.success());
    assert!(path.exists());

    let status = fred().arg("check").arg(&path).status().unwrap();
    assert!(status.success());
}

#[test]
fn test_check_rejects_invalid_node_id() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("node.toml");
    std::fs::write(&path, "[node]\nid = \"not valid\"\nhost = \"h:1\"\n").unwrap();

    let output = fred().arg("check").arg(&path).output().unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("node.id"));
}

#[test]
fn test_env_overrides_are_printed() {
    let output = fred()
        .arg("env")
        .env("FRED_NODE_ID", "edge3")
        .env("FRED_REPLICATION_DEFAULT_EXPIRY", "2m")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("id = \"edge3\""));
    assert!(stdout.contains("default_expiry = \"2m\""));
}
