//! Real child processes through the tokio launcher

#![cfg(unix)]

use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::time::timeout;

use ep_core::pidfile;
use ep_supervisor::{CommandLine, ProcessSupervisor};

fn sh(script: &str) -> CommandLine {
    CommandLine::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

/// Whether `pid` has exited, counting an unreaped zombie as exited
fn is_gone(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| matches!(rest.trim_start().chars().next(), Some('Z' | 'X')))
            .unwrap_or(false),
        Err(_) => !pidfile::is_process_alive(pid),
    }
}

async fn wait_gone(pid: u32) -> bool {
    for _ in 0..60 {
        if is_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_output_is_merged_and_exit_code_reported() {
    let supervisor = ProcessSupervisor::with_tokio_launcher();
    let mut handle = supervisor
        .start(&sh("echo 'Connected to relay'; echo 'error: boom' >&2; printf tail; exit 3"))
        .await
        .unwrap();

    let mut lines = Vec::new();
    while let Some(line) = timeout(Duration::from_secs(5), handle.next_line())
        .await
        .unwrap()
    {
        lines.push(line);
    }
    lines.sort();
    assert_eq!(lines, vec!["Connected to relay", "error: boom", "tail"]);

    let outcome = handle.wait().await;
    assert_eq!(outcome.code, Some(3));
    assert!(!outcome.success());
}

#[tokio::test]
async fn test_stop_kills_process_tree() {
    let dir = TempDir::new().unwrap();
    let pid_path = dir.path().join("core.pid");
    let supervisor = ProcessSupervisor::with_tokio_launcher().with_pid_path(&pid_path);

    // A child that would outlive the shell if only the shell were killed
    let mut handle = supervisor
        .start(&sh("sleep 30 & echo started; wait"))
        .await
        .unwrap();
    assert_eq!(handle.next_line().await.as_deref(), Some("started"));
    assert_eq!(pidfile::read_pid_file(&pid_path).unwrap(), handle.pid());

    let started = Instant::now();
    supervisor.stop().await;
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(handle.exit_outcome().is_some());
    // Output closes once every process holding the pipe is gone
    assert_eq!(
        timeout(Duration::from_secs(3), handle.next_line()).await.unwrap(),
        None
    );
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn test_release_after_self_exit_kills_children() {
    let supervisor = ProcessSupervisor::with_tokio_launcher();
    let mut handle = supervisor
        .start(&sh("sleep 30 & echo $!; exit 0"))
        .await
        .unwrap();
    let child: u32 = timeout(Duration::from_secs(5), handle.next_line())
        .await
        .unwrap()
        .expect("child pid")
        .parse()
        .unwrap();

    let outcome = timeout(Duration::from_secs(5), handle.exited())
        .await
        .unwrap();
    assert!(outcome.success());
    assert!(!is_gone(child));

    assert!(supervisor.release_if_current(handle.generation()));
    assert!(wait_gone(child).await, "background child {} survived", child);
}

#[tokio::test]
async fn test_exit_observed_while_child_holds_output() {
    let supervisor = ProcessSupervisor::with_tokio_launcher();
    let mut handle = supervisor
        .start(&sh("sleep 20 & echo started; exit 3"))
        .await
        .unwrap();
    assert_eq!(handle.next_line().await.as_deref(), Some("started"));

    // The sleeping child still holds stdout, so output never reaches EOF
    let outcome = timeout(Duration::from_secs(5), handle.exited())
        .await
        .expect("exit not observed");
    assert_eq!(outcome.code, Some(3));
    assert!(!supervisor.is_running());

    supervisor.release_if_current(handle.generation());
    assert_eq!(
        timeout(Duration::from_secs(3), handle.next_line()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_start_replaces_running_process() {
    let supervisor = ProcessSupervisor::with_tokio_launcher();
    let mut first = supervisor.start(&sh("exec sleep 30")).await.unwrap();
    let first_pid = first.pid().unwrap();

    let _second = supervisor.start(&sh("exec sleep 30")).await.unwrap();

    assert!(first.exit_outcome().is_some());
    assert!(!pidfile::is_process_alive(first_pid));
    assert_ne!(supervisor.current_pid(), Some(first_pid));
    assert_eq!(first.wait().await.code, None);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_missing_program_is_start_failure() {
    let supervisor = ProcessSupervisor::with_tokio_launcher();
    let result = supervisor
        .start(&CommandLine::new("/nonexistent/ech-workers", Vec::new()))
        .await;
    assert!(result.is_err());
    assert!(!supervisor.is_running());
}
