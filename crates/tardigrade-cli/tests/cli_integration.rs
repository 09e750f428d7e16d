//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tardigrade").expect("Failed to find tardigrade binary");
    cmd.env_remove("TARDIGRADE_DATA_DIR");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

fn check_in(data_dir: &TempDir, first: &str, notes: &str) {
    cli_cmd(data_dir)
        .args([
            "checkin", "--first", first, "--last", "Reyes", "--dob", "1979-06-30", "--notes",
            notes,
        ])
        .assert()
        .success();
}

/// Extract the hash from checkin output (assumes format: "  Hash: <hex>")
fn extract_hash(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("  Hash: "))
        .map(|hash| hash.trim().to_string())
}

// ============================================================================
// Checkin / List
// ============================================================================

#[test]
fn test_list_empty_store() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No records found."));
}

#[test]
fn test_checkin_prints_hash_and_writes_store() {
    let data_dir = TempDir::new().unwrap();

    let output = cli_cmd(&data_dir)
        .args([
            "checkin",
            "--first",
            "Ada",
            "--middle",
            "",
            "--last",
            "Lovelace",
            "--dob",
            "1984-03-09",
            "--water",
            "--people",
            "3",
            "--lat",
            "18.47",
            "--lon",
            "-66.11",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let hash = extract_hash(&stdout).expect("hash in output");
    assert_eq!(hash.len(), 64);

    let csv = std::fs::read_to_string(data_dir.path().join("database.csv")).unwrap();
    assert!(csv.starts_with(&hash));
    assert!(csv.contains("18.47,-66.11"));
}

#[test]
fn test_same_person_twice_keeps_one_record() {
    let data_dir = TempDir::new().unwrap();
    check_in(&data_dir, "Sam", "first visit");
    check_in(&data_dir, "Sam", "second visit");

    cli_cmd(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Records (1):"))
        .stdout(predicate::str::contains("second visit"));
}

#[test]
fn test_checkin_rejects_bad_date() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["checkin", "--first", "A", "--last", "B", "--dob", "09/03/1984"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}

// ============================================================================
// Export / Merge
// ============================================================================

#[test]
fn test_export_then_merge_into_other_store() {
    let device_a = TempDir::new().unwrap();
    let device_b = TempDir::new().unwrap();
    let transfer = TempDir::new().unwrap();
    let file = transfer.path().join("peer.csv");

    check_in(&device_a, "Lena", "needs insulin");

    cli_cmd(&device_a)
        .arg("export")
        .arg("--out")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported"));

    cli_cmd(&device_b)
        .arg("merge")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added: 1"));

    cli_cmd(&device_b)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("needs insulin"))
        .stdout(predicate::str::contains("hops=2"));
}

#[test]
fn test_merge_json_report() {
    let device = TempDir::new().unwrap();
    let transfer = TempDir::new().unwrap();
    let file = transfer.path().join("peer.csv");
    std::fs::write(&file, "x,200,0.0,0.0,0,false,false,1,needs food,0\n").unwrap();

    cli_cmd(&device)
        .arg("merge")
        .arg(&file)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"added\": 1"))
        .stdout(predicate::str::contains("\"total\": 1"));
}

#[test]
fn test_merge_garbage_fails_and_keeps_store() {
    let device = TempDir::new().unwrap();
    let transfer = TempDir::new().unwrap();
    let file = transfer.path().join("garbage.csv");
    std::fs::write(&file, "this is not a store file\n").unwrap();

    check_in(&device, "Omar", "keep me");
    let before = std::fs::read(device.path().join("database.csv")).unwrap();

    cli_cmd(&device).arg("merge").arg(&file).assert().failure();

    let after = std::fs::read(device.path().join("database.csv")).unwrap();
    assert_eq!(before, after);
}

// ============================================================================
// Simulate
// ============================================================================

#[test]
fn test_simulate_syncs_both_stores() {
    let device_a = TempDir::new().unwrap();
    let device_b = TempDir::new().unwrap();
    check_in(&device_a, "Ana", "from a");
    check_in(&device_b, "Ben", "from b");

    cli_cmd(&device_a)
        .arg("simulate")
        .arg("--peer-dir")
        .arg(device_b.path())
        .args(["--chunk-size", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Local:"))
        .stdout(predicate::str::contains("Peer:"))
        .stdout(predicate::str::contains("Total: 2"));

    cli_cmd(&device_b)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("from a"))
        .stdout(predicate::str::contains("from b"));
}

#[test]
fn test_simulate_rejects_tiny_chunks() {
    let device_a = TempDir::new().unwrap();
    let device_b = TempDir::new().unwrap();

    cli_cmd(&device_a)
        .arg("simulate")
        .arg("--peer-dir")
        .arg(device_b.path())
        .args(["--chunk-size", "3"])
        .assert()
        .failure();
}
