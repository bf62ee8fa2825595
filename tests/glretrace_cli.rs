//! Drive the `glretrace` binary the way a user would.

use glretrace::{CallRecord, TraceWriter, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const COLOR_BUFFER_BIT: u64 = 0x4000;

fn glretrace(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_glretrace"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run glretrace")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

/// Write a trace that clears the screen to red and swaps, `frames` times,
/// with the final swap numbered `last_swap`.
fn write_trace(path: &Path, frames: u32, last_swap: u32) {
    let mut trace = TraceWriter::create(path).unwrap();
    let first = last_swap + 1 - 3 * frames;
    for frame in 0..frames {
        let no = first + 3 * frame;
        trace
            .write_record(&CallRecord::new(
                no,
                "glClearColor",
                vec![Value::Float(1.0), Value::Float(0.0), Value::Float(0.0), Value::Float(1.0)],
            ))
            .unwrap();
        trace
            .write_record(&CallRecord::new(
                no + 1,
                "glClear",
                vec![Value::UInt(COLOR_BUFFER_BIT)],
            ))
            .unwrap();
        trace
            .write_record(&CallRecord::new(no + 2, "glXSwapBuffers", vec![]))
            .unwrap();
    }
    trace.finish().unwrap();
}

fn temp_trace(dir: &tempfile::TempDir, frames: u32, last_swap: u32) -> PathBuf {
    let path = dir.path().join("test.trace");
    write_trace(&path, frames, last_swap);
    path
}

#[test]
fn test_three_frames() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 3, 8);
    let output = glretrace(&[trace.to_str().unwrap()]);

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.starts_with("Rendered 3 frames in "), "stdout: {:?}", out);
    assert_eq!(out.lines().count(), 1);
    assert!(output.stderr.is_empty());
}

#[test]
fn test_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 1, 42);
    let prefix = dir.path().join("out");
    let output = glretrace(&["-s", prefix.to_str().unwrap(), trace.to_str().unwrap()]);

    assert!(output.status.success());
    let snapshot = dir.path().join("out0000000042.png");
    assert!(snapshot.exists());
    assert!(stdout(&output).starts_with(&format!("Wrote {}\n", snapshot.display())));

    let image = glretrace::Image::read_png(&snapshot).unwrap();
    assert_eq!((image.width, image.height), (256, 256));
    assert!(image.pixels.chunks(4).all(|pixel| pixel == [255, 0, 0, 255]));
}

#[test]
fn test_compare() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 2, 20);
    let trace = trace.to_str().unwrap();
    let prefix = dir.path().join("ref");
    let prefix = prefix.to_str().unwrap();

    // No references yet: nothing to report.
    let output = glretrace(&["-c", prefix, trace]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("Rendered 2 frames"));

    assert!(glretrace(&["-s", prefix, trace]).status.success());
    let output = glretrace(&["-c", prefix, trace]);
    let out = stdout(&output);
    let reports: Vec<&str> = out.lines().filter(|line| line.starts_with("Snapshot ")).collect();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].starts_with("Snapshot 17 average precision of "));
    assert!(reports[1].starts_with("Snapshot 20 average precision of "));
}

#[test]
fn test_benchmark() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 2, 5);
    let prefix = dir.path().join("out");
    let output = glretrace(&["-b", "-s", prefix.to_str().unwrap(), trace.to_str().unwrap()]);

    // Snapshots are still written, but quietly.
    assert!(output.status.success());
    assert!(dir.path().join("out0000000005.png").exists());
    assert!(stdout(&output).starts_with("Rendered 2 frames"));
}

#[test]
fn test_state_dump() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 5, 14);
    let trace = trace.to_str().unwrap();
    let output = glretrace(&["-D", "10", trace, trace]);

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(!out.contains("Rendered"));
    let dump: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(dump["parameters"]["GL_COLOR_CLEAR_VALUE"], serde_json::json!([1.0, 0.0, 0.0, 1.0]));
}

#[test]
fn test_echo() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 1, 2);
    let output = glretrace(&["-v", trace.to_str().unwrap()]);

    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "0 glClearColor(1, 0, 0, 1)");
    assert_eq!(lines[1], "1 glClear(16384)");
    assert_eq!(lines[2], "2 glXSwapBuffers()");
    assert!(lines[3].starts_with("Rendered 1 frames"));
}

#[test]
fn test_missing_trace() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 1, 2);
    let missing = dir.path().join("missing.trace");
    let output = glretrace(&[missing.to_str().unwrap(), trace.to_str().unwrap()]);

    assert!(output.status.success());
    assert!(stdout(&output).starts_with("Rendered 1 frames"));
    let err = String::from_utf8(output.stderr).unwrap();
    assert!(err.contains("missing.trace"));
}

#[test]
fn test_multiple_traces() {
    let dir = tempfile::tempdir().unwrap();
    let first = temp_trace(&dir, 2, 5);
    let second = dir.path().join("second.trace");
    write_trace(&second, 3, 8);
    let missing = dir.path().join("missing.trace");
    let args = [
        missing.to_str().unwrap(),
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ];

    // The run ends after the first trace that opens.
    let output = glretrace(&args);
    assert!(output.status.success());
    assert_eq!(stdout(&output).lines().count(), 1);
    assert!(stdout(&output).starts_with("Rendered 2 frames"));
}

#[test]
fn test_wait() {
    let dir = tempfile::tempdir().unwrap();
    let first = temp_trace(&dir, 2, 5);
    let second = dir.path().join("second.trace");
    write_trace(&second, 3, 8);

    // There's no window to close, so waiting ends at once, and the next
    // trace gets its turn.
    let output = glretrace(&["-w", first.to_str().unwrap(), second.to_str().unwrap()]);
    assert!(output.status.success());
    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Rendered 2 frames"));
    assert!(lines[1].starts_with("Rendered 3 frames"));
}

#[test]
fn test_quiet_after_verbose() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 1, 2);
    let prefix = dir.path().join("out");
    let output = glretrace(&["-v", "-b", "-s", prefix.to_str().unwrap(), trace.to_str().unwrap()]);

    // `-b` came last, so there's no echo and no `Wrote` notice.
    assert!(output.status.success());
    assert!(dir.path().join("out0000000002.png").exists());
    let out = stdout(&output);
    assert_eq!(out.lines().count(), 1);
    assert!(out.starts_with("Rendered 1 frames"));
}

#[test]
fn test_bad_option() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("out");
    let trace = temp_trace(&dir, 1, 2);
    let output = glretrace(&["-z", "-s", prefix.to_str().unwrap(), trace.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8(output.stderr).unwrap().contains("glretrace"));
    assert!(!dir.path().join("out0000000002.png").exists());
}

#[test]
fn test_help() {
    let output = glretrace(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_dump_calls() {
    let dir = tempfile::tempdir().unwrap();
    let trace = temp_trace(&dir, 1, 2);
    let missing = dir.path().join("missing.trace");
    let output = Command::new(env!("CARGO_BIN_EXE_dump-calls"))
        .args(&[missing.to_str().unwrap(), trace.to_str().unwrap()])
        .output()
        .expect("failed to run dump-calls");

    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        "0 glClearColor(1, 0, 0, 1)\n1 glClear(16384)\n2 glXSwapBuffers()\n"
    );
    let err = String::from_utf8(output.stderr).unwrap();
    assert!(err.starts_with(&format!("{}: ", missing.display())), "stderr: {:?}", err);
}
