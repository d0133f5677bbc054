#![cfg(feature = "cli")]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "ctxbridge-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn envelope(id: &str) -> String {
    format!(
        r#"{{"type":"apply","id":"{id}","path":["math","add"],"sender":"injector","args":[1,2],"callbackIds":[],"meta":{{}},"namespace":"__comctx__","timeStamp":1700000000000}}"#
    )
}

fn ctxbridge() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ctxbridge"));
    command.arg("--log-level").arg("error");
    command
}

#[test]
fn check_valid_file_exits_zero() {
    let dir = unique_temp_dir("check-valid");
    let path = dir.join("envelope.json");
    std::fs::write(&path, envelope("abc")).expect("envelope should be writable");

    let output = ctxbridge()
        .arg("--format")
        .arg("json")
        .arg("check")
        .arg(&path)
        .output()
        .expect("check should run");

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"valid\":true"));
    assert!(stdout.contains("\"path\":\"math.add\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn check_invalid_stdin_returns_60() {
    let mut child = ctxbridge()
        .arg("--format")
        .arg("json")
        .arg("check")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("check should start");

    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(envelope("").as_bytes())
        .expect("stdin should accept envelope");

    let output = child.wait_with_output().expect("check should finish");
    assert_eq!(output.status.code(), Some(60));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"valid\":false"));
    assert!(stdout.contains("'id'"));
}

#[test]
fn check_malformed_json_returns_60() {
    let dir = unique_temp_dir("check-malformed");
    let path = dir.join("broken.json");
    std::fs::write(&path, "{not json").expect("file should be writable");

    let output = ctxbridge()
        .arg("check")
        .arg(&path)
        .output()
        .expect("check should run");

    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid JSON"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn check_missing_file_is_usage_error() {
    let output = ctxbridge()
        .arg("check")
        .arg("/nonexistent/ctxbridge/envelope.json")
        .output()
        .expect("check should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn selftest_passes() {
    let output = ctxbridge()
        .arg("--format")
        .arg("json")
        .arg("selftest")
        .arg("--heartbeat-interval")
        .arg("50ms")
        .arg("--heartbeat-timeout")
        .arg("1s")
        .arg("--transfer")
        .output()
        .expect("selftest should run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
    assert!(stdout.contains("\"passed\":true"));
    assert!(stdout.contains("\"name\":\"callback\""));
}

#[test]
fn selftest_rejects_timeout_below_interval() {
    let output = ctxbridge()
        .arg("selftest")
        .arg("--heartbeat-interval")
        .arg("1s")
        .arg("--heartbeat-timeout")
        .arg("500ms")
        .output()
        .expect("selftest should run");

    assert_eq!(output.status.code(), Some(64));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must exceed interval"));
}

#[test]
fn version_prints_name() {
    let output = ctxbridge()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("ctxbridge "));
}
