//! Concurrency tests for the pillbox binary.
//!
//! These tests verify that multiple processes can safely:
//! - Register users simultaneously without losing or reusing ids
//! - Mark doses while other processes read the snapshot

use assert_cmd::Command;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn cli(data_dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pillbox"));
    cmd.env("XDG_CONFIG_HOME", data_dir.join("config"))
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("stdout is not JSON")
}

#[test]
fn test_concurrent_user_registration() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    // Hammer the CLI with many concurrent writes
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let data_dir: PathBuf = data_dir.clone();
            thread::spawn(move || {
                let user = stdout_json(cli(&data_dir).args(["user", "add", format!("user-{}", i).as_str()]));
                user["id"].as_u64().expect("user id")
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();
    ids.sort_unstable();

    // Every registration got its own id, with no gaps
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());

    // Snapshot is still valid JSON after the load
    let contents = std::fs::read_to_string(data_dir.join("pillbox.json")).unwrap();
    let snapshot: Value = serde_json::from_str(&contents).expect("snapshot corrupted");
    assert!(snapshot["users"].is_object());
}

#[test]
fn test_marks_and_reads_interleave() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    stdout_json(cli(&data_dir).args(["user", "add", "Ada"]));
    let created = stdout_json(
        cli(&data_dir)
            .args(["rx", "add", "--patient", "1", "--start", "2099-03-01T08:00:00Z"])
            .write_stdin(
                r#"{
                    "medication": { "name": "Ibuprofen" },
                    "schedule": {
                        "period": "8h",
                        "doses": [{ "offset_into_period": 0, "amount": 200, "unit": "mg" }]
                    },
                    "dose_count": 6
                }"#,
            ),
    );
    let dose_ids: Vec<u64> = created["regimen"]["doses"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_u64().unwrap())
        .collect();
    assert_eq!(dose_ids.len(), 6);

    // Mark every other dose while a reader polls
    let writers: Vec<_> = dose_ids
        .iter()
        .step_by(2)
        .enumerate()
        .map(|(i, &id)| {
            let data_dir = data_dir.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(i as u64 * 5));
                stdout_json(cli(&data_dir).args(["dose", "take", id.to_string().as_str()]));
            })
        })
        .collect();

    let reader_dir = data_dir.clone();
    let reader = thread::spawn(move || {
        for _ in 0..3 {
            stdout_json(cli(&reader_dir).args(["remaining", "--patient", "1", "--json"]));
        }
    });

    for handle in writers {
        handle.join().expect("Writer thread panicked");
    }
    reader.join().expect("Reader thread panicked");

    let groups = stdout_json(cli(&data_dir).args(["remaining", "--patient", "1", "--json"]));
    let remaining: Vec<u64> = groups[0]["doses"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_u64().unwrap())
        .collect();
    let expected: Vec<u64> = dose_ids.iter().skip(1).step_by(2).copied().collect();
    assert_eq!(remaining, expected);
}
