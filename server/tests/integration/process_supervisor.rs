//! `DevServerSupervisor` driving real `sh` children.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::time::Duration;

use previewd::application::{DevProcess, ProcessSupervisor};
use previewd::domain::InstanceError;
use previewd::infra::TokioCommandRunner;
use previewd::infra::dev_server::{DevServerSettings, DevServerSupervisor};

use crate::command_runner::{read_pid, wait_until_gone};

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

fn settings(install: Vec<String>, dev: Vec<String>) -> DevServerSettings {
    DevServerSettings {
        install_command: install,
        install_timeout: Duration::from_secs(10),
        dev_server_command: dev,
        quiet_patterns: vec!["npm WARN".into()],
        termination_grace: Duration::from_millis(300),
    }
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(content) = std::fs::read_to_string(path) {
            if !content.is_empty() {
                return content;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never appeared", path.display());
}

fn instance_error(err: anyhow::Error) -> InstanceError {
    err.downcast::<InstanceError>().expect("typed instance error")
}

#[tokio::test]
async fn test_launch_installs_then_runs_with_port_env() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = DevServerSupervisor::new(
        TokioCommandRunner,
        settings(
            sh("echo \"$CI\" > installed.txt"),
            sh("echo \"$CI:$PORT:{port}\" > env.txt; exec sleep 30"),
        ),
    );

    let process = supervisor.launch("app1", dir.path(), 8123).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(dir.path().join("installed.txt")).unwrap().trim(),
        "1"
    );
    assert_eq!(wait_for_file(&dir.path().join("env.txt")).await.trim(), "1:8123:8123");
    assert!(process.pid().is_some());
    assert!(!process.has_exited());

    process.terminate();
    tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .expect("process exits after SIGTERM");
    assert!(process.has_exited());
}

#[tokio::test]
async fn test_empty_install_command_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor =
        DevServerSupervisor::new(TokioCommandRunner, settings(Vec::new(), sh("exit 0")));

    let process = supervisor.launch("app1", dir.path(), 8123).await.unwrap();

    let code = tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .unwrap();
    assert_eq!(code, Some(0));
}

#[tokio::test]
async fn test_install_failure_is_dependency_install() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = DevServerSupervisor::new(
        TokioCommandRunner,
        settings(sh("echo 'resolve failed' >&2; exit 3"), sh("exec sleep 30")),
    );

    let err = instance_error(supervisor.launch("app1", dir.path(), 8123).await.unwrap_err());

    match err {
        InstanceError::DependencyInstall(msg) => assert!(msg.contains("resolve failed"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_install_timeout_is_dependency_install() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = settings(vec!["sleep".into(), "5".into()], sh("exec sleep 30"));
    cfg.install_timeout = Duration::from_millis(200);
    let supervisor = DevServerSupervisor::new(TokioCommandRunner, cfg);

    let started = std::time::Instant::now();
    let err = instance_error(supervisor.launch("app1", dir.path(), 8123).await.unwrap_err());

    assert!(started.elapsed() < Duration::from_secs(4));
    match err {
        InstanceError::DependencyInstall(msg) => assert!(msg.contains("timed out"), "{msg}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_program_is_process_launch() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = DevServerSupervisor::new(
        TokioCommandRunner,
        settings(Vec::new(), vec!["/nonexistent/previewd-dev-server".into()]),
    );

    let err = instance_error(supervisor.launch("app1", dir.path(), 8123).await.unwrap_err());

    assert!(matches!(err, InstanceError::ProcessLaunch(_)), "{err:?}");
}

#[tokio::test]
async fn test_terminate_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = DevServerSupervisor::new(
        TokioCommandRunner,
        settings(
            Vec::new(),
            sh("trap '' TERM; echo up > up.txt; while true; do sleep 0.1; done"),
        ),
    );

    let process = supervisor.launch("app1", dir.path(), 8123).await.unwrap();
    wait_for_file(&dir.path().join("up.txt")).await;

    process.terminate();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process.has_exited(), "SIGTERM should be ignored");

    tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .expect("SIGKILL after the grace window");
    assert!(process.has_exited());
}

#[tokio::test]
async fn test_terminate_after_exit_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor =
        DevServerSupervisor::new(TokioCommandRunner, settings(Vec::new(), sh("exit 7")));

    let process = supervisor.launch("app1", dir.path(), 8123).await.unwrap();
    let code = tokio::time::timeout(Duration::from_secs(5), process.wait())
        .await
        .unwrap();

    assert_eq!(code, Some(7));
    process.terminate();
    process.terminate();
    assert!(process.has_exited());
}

#[tokio::test]
async fn test_dropped_handle_stops_dev_server() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = DevServerSupervisor::new(
        TokioCommandRunner,
        settings(Vec::new(), sh("echo $$ > pid.txt; exec sleep 30")),
    );

    let process = supervisor.launch("app1", dir.path(), 8123).await.unwrap();
    let pid = read_pid(&dir.path().join("pid.txt")).await;

    drop(process);

    wait_until_gone(pid).await;
}
