//! CLI integration tests

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the `retrain` binary inside `dir` with colors and env overrides off
fn retrain(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_retrain"))
        .args(args)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn make_dataset(root: &Path) {
    fs::create_dir_all(root.join("images")).unwrap();
    fs::create_dir_all(root.join("labels")).unwrap();
    fs::write(root.join("images/part_001.jpg"), b"jpg").unwrap();
    fs::write(root.join("labels/part_001.txt"), b"0 0.5 0.5 0.2 0.2").unwrap();
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Retraining pipeline"), "Should show about text");
    for command in ["run", "evaluate", "history", "prepare", "reconcile", "finetune", "promote"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("retrain"), "Should show binary name");
}

/// Test run subcommand help
#[test]
fn test_run_help() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["run", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Run help should succeed");
    assert!(stdout.contains("--auto"), "Should show auto option");
    assert!(stdout.contains("--originals"), "Should show originals option");
    assert!(stdout.contains("--dataset"), "Should show dataset option");
    assert!(stdout.contains("--yes"), "Should show yes option");
}

/// Test evaluate subcommand help
#[test]
fn test_evaluate_help() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["evaluate", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Evaluate help should succeed");
    assert!(stdout.contains("--model"), "Should show model option");
    assert!(stdout.contains("--record"), "Should show record option");
}

/// Test that yes and no are mutually exclusive
#[test]
fn test_run_rejects_yes_and_no() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["run", "--dataset", "x", "--yes", "--no"]);

    assert!(!output.status.success(), "Conflicting flags should fail");
}

/// Test history on a fresh state directory
#[test]
fn test_history_empty() {
    let temp_dir = TempDir::new().unwrap();
    let output = retrain(temp_dir.path(), &["history"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "History should succeed without a log");
    assert!(stdout.contains("No evaluations recorded yet"));
}

/// Test history as JSON
#[test]
fn test_history_json() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("history")).unwrap();
    fs::write(
        temp_dir.path().join("history/eval_history.csv"),
        "timestamp,metric\n2026-01-01T10:00:00Z,0.7\n2026-01-02T10:00:00Z,0.65\n",
    )
    .unwrap();

    let output = retrain(temp_dir.path(), &["--format", "json", "history"]);
    assert!(output.status.success(), "History should succeed");

    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["metric"], 0.65);
    assert!(entries[0]["delta"].is_null());
}

/// Test that a missing deployed model fails with exit code 1
#[test]
fn test_run_without_deployed_model_fails() {
    let temp_dir = TempDir::new().unwrap();
    make_dataset(&temp_dir.path().join("batch"));

    let output = retrain(temp_dir.path(), &["run", "--dataset", "batch", "--no"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("evaluate"), "Should name the failing step");
    assert!(
        !temp_dir.path().join("history/eval_history.csv").exists(),
        "History must not be touched"
    );
}

/// Test that an invalid dataset folder fails with exit code 1
#[test]
fn test_prepare_invalid_dataset_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("empty")).unwrap();

    let output = retrain(temp_dir.path(), &["prepare", "--dataset", "empty"]);
    assert_eq!(output.status.code(), Some(1));
}

/// Test that prepare writes the evaluation descriptor
#[test]
fn test_prepare_writes_descriptor() {
    let temp_dir = TempDir::new().unwrap();
    make_dataset(&temp_dir.path().join("batch"));

    let output = retrain(temp_dir.path(), &["prepare", "--dataset", "batch"]);

    assert!(output.status.success(), "Prepare should succeed");
    assert!(temp_dir.path().join("batch/data_eval.yaml").is_file());
}

/// Test that an invalid configuration value is reported
#[test]
fn test_invalid_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("retrain.toml"),
        "[engine]\nepochs = 0\n",
    )
    .unwrap();

    let output = retrain(temp_dir.path(), &["history"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("configuration"));
}

/// Test that Ctrl-C while waiting at a prompt exits promptly with code 0
#[cfg(unix)]
#[test]
fn test_interrupt_at_prompt_exits() {
    use std::io::Read;
    use std::process::Stdio;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    let temp_dir = TempDir::new().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_retrain"))
        .arg("run")
        .current_dir(temp_dir.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn command");
    // Held open so the prompt never sees end of input
    let _stdin = child.stdin.take().unwrap();

    let mut stdout = child.stdout.take().unwrap();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut seen = String::new();
        let mut buf = [0u8; 256];
        while let Ok(n) = stdout.read(&mut buf) {
            if n == 0 {
                break;
            }
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
            if seen.contains("Choice [1/2]:") {
                let _ = tx.send(());
            }
        }
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("Prompt should appear");

    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    let exit = loop {
        if let Some(exit) = child.try_wait().unwrap() {
            break exit;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("Process still running after SIGINT");
        }
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(exit.code(), Some(0));
}
