//! ProcessRunner against real processes.
//!
//! Verifies that timeouts and cancellation leave no process behind,
//! including grandchildren started by the command.

#![cfg(unix)]

mod common;

use std::time::Duration;

use sc64deck_core::runner::{CommandRunner, ProcessRunner, RunOutcome};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Script that forks a long-lived grandchild, records its pid and waits.
fn forking_script(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let pid_file = dir.join("grandchild.pid");
    let script = common::write_script(
        dir,
        "forker",
        &format!(
            "#!/bin/sh\nsleep 30 &\necho $! > '{}'\nwait\n",
            pid_file.display()
        ),
    );
    (script, pid_file)
}

#[tokio::test]
async fn timeout_kills_command_and_grandchild() {
    let dir = tempfile::tempdir().unwrap();
    let (script, pid_file) = forking_script(dir.path());

    let started = Instant::now();
    let outcome = ProcessRunner::new()
        .run(
            &[script.to_string_lossy().into_owned()],
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, RunOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(6));

    let grandchild = common::read_pid_file(&pid_file).await;
    assert!(
        common::wait_until_gone(grandchild, Duration::from_secs(2)).await,
        "grandchild {grandchild} survived the timeout"
    );
}

#[tokio::test]
async fn cancellation_kills_command_and_grandchild() {
    let dir = tempfile::tempdir().unwrap();
    let (script, pid_file) = forking_script(dir.path());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watched = pid_file.clone();
    tokio::spawn(async move {
        common::read_pid_file(&watched).await;
        trigger.cancel();
    });

    let outcome = ProcessRunner::new()
        .run(
            &[script.to_string_lossy().into_owned()],
            Duration::from_secs(30),
            &cancel,
        )
        .await;
    assert_eq!(outcome, RunOutcome::Cancelled);

    let grandchild = common::read_pid_file(&pid_file).await;
    assert!(common::wait_until_gone(grandchild, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn large_output_is_fully_captured() {
    let outcome = ProcessRunner::new()
        .run(
            &argv(&[
                "/bin/sh",
                "-c",
                "head -c 300000 /dev/zero | tr '\\0' a; head -c 70000 /dev/zero | tr '\\0' b >&2",
            ]),
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await;
    match outcome {
        RunOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => {
            assert_eq!(exit_code, 0);
            assert_eq!(stdout.len(), 300_000);
            assert_eq!(stderr.len(), 70_000);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn non_executable_file_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-executable");
    std::fs::write(&path, "#!/bin/sh\n").unwrap();

    let outcome = ProcessRunner::new()
        .run(
            &[path.to_string_lossy().into_owned()],
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(outcome, RunOutcome::SpawnFailed { .. }));
}
