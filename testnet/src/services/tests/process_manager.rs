//! Tests for ProcessManager
//!
//! These spawn real short-lived `sh`/`sleep` processes and check log capture,
//! exit bookkeeping and graceful termination.

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

use super::common::with_timeout;
use crate::error::TestnetError;
use crate::services::file_lock::is_pid_alive;
use crate::services::process_manager::ProcessManager;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

fn manager() -> ProcessManager {
    ProcessManager::new().with_grace_period(Duration::from_millis(500))
}

#[tokio::test]
async fn test_launch_nonexistent_binary_fails() {
    let logs = TempDir::new().unwrap();

    let err = manager()
        .launch("/nonexistent/bin", &[], "ghost", Some(logs.path()))
        .await
        .unwrap_err();

    match err {
        TestnetError::ProcessLaunch { command, args, .. } => {
            assert_eq!(command, "/nonexistent/bin");
            assert!(args.is_empty());
        }
        other => panic!("expected launch error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_output_and_exit_status_are_logged() {
    let logs = TempDir::new().unwrap();

    let (launch, _cleanup) = manager()
        .launch("sh", &args(&["-c", "echo hello; echo oops >&2"]), "echo", Some(logs.path()))
        .await
        .unwrap();

    let pid = launch.process.pid;
    assert_eq!(
        launch.log_path.file_name().unwrap().to_string_lossy(),
        format!("sh_node_undefined_{pid}.log")
    );
    assert!(launch.discovered_port.is_none());

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert_eq!(summary.code, Some(0));
    assert!(!summary.intentional);
    assert!(launch.process.has_exited());

    let log = read_log(&launch.log_path);
    assert!(log.contains("hello"), "stdout missing from log: {log}");
    assert!(log.contains("oops"), "stderr missing from log: {log}");
    assert!(log.trim_end().ends_with("process exited with status code 0"), "log: {log}");
}

#[tokio::test]
async fn test_working_dir_is_applied() {
    let logs = TempDir::new().unwrap();
    let workdir = TempDir::new().unwrap();
    let expected = workdir.path().canonicalize().unwrap();

    let (launch, _cleanup) = manager()
        .with_working_dir(workdir.path())
        .launch("sh", &args(&["-c", "pwd -P"]), "pwd", Some(logs.path()))
        .await
        .unwrap();

    with_timeout(launch.process.wait_for_exit()).await.unwrap();
    let log = read_log(&launch.log_path);
    assert!(log.lines().any(|line| Path::new(line.trim()) == expected), "log: {log}");
    assert!(launch.log_path.starts_with(logs.path()));
}

#[tokio::test]
async fn test_unexpected_failure_is_not_intentional() {
    let logs = TempDir::new().unwrap();

    let (launch, _cleanup) = manager()
        .launch("sh", &args(&["-c", "exit 3"]), "crasher", Some(logs.path()))
        .await
        .unwrap();

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert_eq!(summary.code, Some(3));
    assert!(!launch.process.is_intentional_termination());
    assert!(launch.process.termination_reason().is_none());
    assert!(read_log(&launch.log_path).contains("process exited with status code 3"));
}

#[tokio::test]
async fn test_cleanup_stops_process_intentionally() {
    let logs = TempDir::new().unwrap();

    let (launch, cleanup) = manager()
        .launch("sleep", &args(&["30"]), "sleeper", Some(logs.path()))
        .await
        .unwrap();
    let pid = launch.process.pid;
    assert_eq!(cleanup.pid(), pid);
    assert!(is_pid_alive(pid));

    with_timeout(cleanup.run("test finished")).await.unwrap().unwrap();

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert!(summary.intentional);
    assert_eq!(summary.reason.as_deref(), Some("test finished"));
    assert!(launch.process.is_intentional_termination());
    assert!(!is_pid_alive(pid));

    let log = read_log(&launch.log_path);
    assert!(
        log.trim_end().ends_with("process killed intentionally. reason: test finished"),
        "log: {log}"
    );

    // Running it again is a no-op
    assert!(cleanup.run("again").await.is_ok());
    assert_eq!(launch.process.termination_reason().as_deref(), Some("test finished"));
}

#[tokio::test]
async fn test_sigterm_ignored_escalates_to_sigkill() {
    let logs = TempDir::new().unwrap();

    let (launch, cleanup) = ProcessManager::new()
        .with_grace_period(Duration::from_millis(300))
        .launch("sh", &args(&["-c", "trap '' TERM; exec sleep 30"]), "stubborn", Some(logs.path()))
        .await
        .unwrap();

    // Give the shell time to install the trap
    tokio::time::sleep(Duration::from_millis(200)).await;
    with_timeout(cleanup.run("stubborn test")).await.unwrap().unwrap();

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert_eq!(summary.signal, Some(9));
    assert!(summary.intentional);
}

#[tokio::test]
async fn test_log_name_uses_port_argument() {
    let logs = TempDir::new().unwrap();

    // Extra words after the script become `$0`, which `exit 0` ignores
    let (launch, _cleanup) = manager()
        .launch("sh", &args(&["-c", "exit 0", "--rpc-port=9944"]), "ported", Some(logs.path()))
        .await
        .unwrap();

    let pid = launch.process.pid;
    assert_eq!(launch.log_path, logs.path().join(format!("sh_node_9944_{pid}.log")));
    with_timeout(launch.process.wait_for_exit()).await.unwrap();
}

#[tokio::test]
async fn test_unusable_log_dir_still_launches() {
    let scratch = TempDir::new().unwrap();
    let not_a_dir = scratch.path().join("file");
    std::fs::write(&not_a_dir, b"x").unwrap();

    let (launch, _cleanup) = manager()
        .launch("sh", &args(&["-c", "exit 0"]), "nolog", Some(&not_a_dir.join("logs")))
        .await
        .unwrap();

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert_eq!(summary.code, Some(0));
    assert!(!launch.log_path.exists());
}

#[tokio::test]
async fn test_abort_signals_without_waiting() {
    let logs = TempDir::new().unwrap();

    let (launch, cleanup) = manager()
        .launch("sleep", &args(&["30"]), "aborted", Some(logs.path()))
        .await
        .unwrap();

    cleanup.abort("caller went away");

    let summary = with_timeout(launch.process.wait_for_exit()).await.unwrap();
    assert!(summary.intentional);
    assert_eq!(summary.reason.as_deref(), Some("caller went away"));
}
