use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const RECORD: &str = r#"{"network":"NZ","station":"TGA","location":"40","channel":"BTT","start":"2024-03-07T04:09:58Z","sample_rate":1.0,"samples":[1.0,2.0,3.0]}"#;

fn msdetide() -> Command {
    let mut cmd = Command::cargo_bin("msdetide").unwrap();
    cmd.env_remove("DETIDE_GTS").env_remove("DETIDE_FIRFILE").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version_flag() {
    msdetide()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("msdetide"));
}

#[test]
fn test_reads_stdin_without_files() {
    let tmp = TempDir::new().unwrap();

    msdetide()
        .args(["-G", tmp.path().to_str().unwrap()])
        .write_stdin(format!("{}\n", RECORD))
        .assert()
        .success();

    let first = tmp.path().join("NZ_TGA_40_BTT.202403070409.txt");
    let second = tmp.path().join("NZ_TGA_40_BTT.202403070410.txt");
    assert_eq!(fs::read_to_string(first).unwrap().lines().count(), 2);
    assert_eq!(fs::read_to_string(second).unwrap().lines().count(), 1);
}

#[test]
fn test_empty_stdin_succeeds() {
    let tmp = TempDir::new().unwrap();

    msdetide()
        .args(["-G", tmp.path().to_str().unwrap()])
        .write_stdin("")
        .assert()
        .success();

    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[test]
fn test_missing_filter_file_fails() {
    let tmp = TempDir::new().unwrap();

    msdetide()
        .args(["-G", tmp.path().to_str().unwrap()])
        .args(["-N", "/nonexistent/filters.fir", "-F", "lp"])
        .write_stdin(format!("{}\n", RECORD))
        .assert()
        .failure()
        .stderr(predicate::str::contains("fir filter"));
}

#[test]
fn test_unknown_filter_fails() {
    let tmp = TempDir::new().unwrap();
    let firfile = tmp.path().join("filters.fir");
    fs::write(
        &firfile,
        "filters:\n  - name: lp\n    decimate: 2\n    coefficients: [0.5, 0.5]\n",
    )
    .unwrap();
    let input = tmp.path().join("in.jsonl");
    fs::write(&input, format!("{}\n", RECORD)).unwrap();

    msdetide()
        .args(["-G", tmp.path().to_str().unwrap()])
        .args(["-N", firfile.to_str().unwrap(), "-F", "hp"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not find fir filter [hp]"));
}

#[test]
fn test_malformed_constituent_is_usage_error() {
    msdetide()
        .args(["-T", "M2/abc/45"])
        .write_stdin("")
        .assert()
        .failure();
}
