use std::fs;
use std::process::Command;

fn bin_path() -> String {
    env!("CARGO_BIN_EXE_zelo").to_string()
}

#[test]
fn eval_flag_runs_one_line() {
    let output = Command::new(bin_path())
        .args(["-e", "print(1 + 2 * 3);"])
        .output()
        .expect("failed to run zelo");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "7\n");
}

#[test]
fn script_files_run_and_exit_zero() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("hello.z");
    fs::write(&script, "loc who = \"world\"; print(\"hello \" + who);").unwrap();
    let output = Command::new(bin_path())
        .arg(&script)
        .output()
        .expect("failed to run zelo");
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hello world\n");
}

#[test]
fn check_flag_stops_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("checked.z");
    fs::write(&script, "print(\"should not run\");").unwrap();
    let output = Command::new(bin_path())
        .args(["--check"])
        .arg(&script)
        .output()
        .expect("failed to run zelo");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Syntax check passed"));
    assert!(!stdout.contains("should not run"));
}

#[test]
fn syntax_errors_exit_nonzero() {
    let output = Command::new(bin_path())
        .args(["-e", "loc = ;"])
        .output()
        .expect("failed to run zelo");
    assert!(!output.status.success());
}

#[test]
fn runtime_errors_exit_nonzero() {
    let output = Command::new(bin_path())
        .args(["-e", "loc x = 1 / 0;"])
        .output()
        .expect("failed to run zelo");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Division by zero"));
}
