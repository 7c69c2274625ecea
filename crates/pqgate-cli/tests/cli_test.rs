//! Binary-level tests for the `pqgate` command.

use assert_cmd::Command;
use predicates::prelude::*;

fn pqgate() -> Command {
    Command::cargo_bin("pqgate").unwrap()
}

#[test]
fn test_decode_prints_canonical_json() {
    pqgate()
        .args([
            "decode",
            "--topic",
            "STMS1/adstop",
            "0000803f0000004000004040000080401e0f09030f06180001",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""timestamp": "2024-06-15 09:15:30""#))
        .stdout(predicate::str::contains(r#""ANASEN_CH1": 1.0"#));
}

#[test]
fn test_decode_short_payload_falls_back_to_raw() {
    pqgate()
        .args(["decode", "--topic", "STMS1/ddstop", "0102"])
        .assert()
        .success()
        .stdout(predicate::str::contains("binary_data"));
}

#[test]
fn test_decode_rejects_unknown_topic() {
    pqgate()
        .args(["decode", "--topic", "STMS1/status", "00"])
        .assert()
        .failure();
}

#[test]
fn test_serve_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pqgate.toml");
    std::fs::write(&path, "[broadcast]\nqueue_capacity = 0\n").unwrap();

    pqgate()
        .args(["serve", "--config"])
        .arg(&path)
        .assert()
        .failure();
}
