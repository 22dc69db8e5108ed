use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn packet(seq: u64) -> String {
    serde_json::json!({
        "kind": "data",
        "seq": seq,
        "station": "NZ_TGA",
        "record": {
            "network": "NZ",
            "station": "TGA",
            "location": "40",
            "channel": "BTT",
            "start": format!("2024-03-07T04:09:{:02}Z", seq),
            "sample_rate": 1.0,
            "samples": [seq as f64],
        },
    })
    .to_string()
}

/// Serve one client: wait for `start`, push two data packets, then hold the
/// connection until the client hangs up.
fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let (socket, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(socket.try_clone().unwrap());
        let mut writer = socket;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            if line.contains("\"start\"") {
                break;
            }
        }
        for seq in 1..=2 {
            writeln!(writer, "{}", packet(seq)).unwrap();
        }
        writer.flush().unwrap();
        line.clear();
        while reader.read_line(&mut line).unwrap_or(0) > 0 {
            line.clear();
        }
    });
    address
}

fn sldetide_process(dir: &Path) -> ProcessCommand {
    let mut cmd = ProcessCommand::new(env!("CARGO_BIN_EXE_sldetide"));
    cmd.current_dir(dir)
        .env_remove("DETIDE_GTS")
        .env_remove("DETIDE_FIRFILE")
        .env_remove("SEEDLINK_SERVER")
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

fn send_signal(child: &Child, signal: &str) {
    let status = ProcessCommand::new("kill")
        .arg(format!("-{}", signal))
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(status.success());
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        assert!(Instant::now() < deadline, "sldetide did not exit");
        thread::sleep(Duration::from_millis(20));
    }
}

fn wait_for_lines(path: &Path, count: usize) {
    let deadline = Instant::now() + WAIT;
    while fs::read_to_string(path).map_or(0, |c| c.lines().count()) < count {
        assert!(Instant::now() < deadline, "no output in {}", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_version_flag() {
    Command::cargo_bin("sldetide")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sldetide"));
}

#[test]
fn test_unreadable_streamlist_fails() {
    Command::cargo_bin("sldetide")
        .unwrap()
        .env_remove("RUST_LOG")
        .args(["-l", "/nonexistent/streams"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unable to load stream selection"));
}

#[test]
fn test_hangup_ignored_and_terminate_checkpoints_once() {
    let tmp = TempDir::new().unwrap();
    let gts = tmp.path().join("gts");
    let other = tmp.path().join("other");
    fs::create_dir(&gts).unwrap();
    fs::create_dir(&other).unwrap();
    let statefile = tmp.path().join("sldetide.state");
    let address = spawn_server();

    let mut child = sldetide_process(tmp.path())
        .arg("-vv")
        .args(["-x", statefile.to_str().unwrap(), "-u", "0"])
        .args(["-G", other.to_str().unwrap()])
        .arg(&address)
        .arg(&gts)
        .spawn()
        .unwrap();

    wait_for_lines(&gts.join("NZ_TGA_40_BTT.202403070409.txt"), 2);

    send_signal(&child, "HUP");
    thread::sleep(Duration::from_millis(300));
    assert!(child.try_wait().unwrap().is_none(), "SIGHUP must not stop sldetide");

    send_signal(&child, "TERM");
    let status = wait_for_exit(&mut child);
    let output = child.wait_with_output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(status.success(), "stderr: {}", stderr);
    assert_eq!(stderr.matches("Checkpoint saved").count(), 1, "stderr: {}", stderr);
    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&statefile).unwrap()).unwrap();
    assert_eq!(saved["positions"]["NZ_TGA"], 2);
    assert_eq!(fs::read_dir(&other).unwrap().count(), 0);
}

#[test]
fn test_without_output_directory_writes_stdout() {
    let tmp = TempDir::new().unwrap();
    let address = spawn_server();

    let mut child = sldetide_process(tmp.path()).arg(&address).spawn().unwrap();

    let stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    let first = rx.recv_timeout(WAIT).unwrap();
    let second = rx.recv_timeout(WAIT).unwrap();
    assert!(first.contains("2024-03-07T04:09:01.000Z"));
    assert!(second.contains("2024-03-07T04:09:02.000Z"));

    send_signal(&child, "INT");
    assert!(wait_for_exit(&mut child).success());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}
