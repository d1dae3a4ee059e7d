//! OS process supervisor tests

#![cfg(unix)]

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use deployd::deploy::spawner::{OsSupervisor, ProcessSupervisor, RunnerTemplate, SpawnRequest};
use deployd::errors::ErrorKind;
use deployd::filesys::dir::Dir;
use deployd::models::deployment::ProcessHandle;

fn template(program: &str, args: &[&str]) -> RunnerTemplate {
    RunnerTemplate {
        program: program.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn request(id: &str) -> SpawnRequest {
    SpawnRequest {
        deployment_id: id.to_string(),
        config_ref: "alice-bot".to_string(),
        port: 8502,
    }
}

async fn wait_dead(supervisor: &OsSupervisor, handle: &ProcessHandle) -> bool {
    for _ in 0..50 {
        if !supervisor.is_alive(handle).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_spawn_and_terminate() {
    let logs = Dir::create_temp_dir("deployd-logs").await.unwrap();
    let supervisor = OsSupervisor::new(
        template("sleep", &["30"]),
        Some(logs.clone()),
        Duration::from_secs(2),
    );

    let handle = assert_ok!(supervisor.spawn(&request("d-sleep")).await);
    assert!(handle.pid > 0);
    assert!(supervisor.is_alive(&handle).await);

    assert_ok!(supervisor.terminate(&handle).await);
    assert!(!supervisor.is_alive(&handle).await);

    // terminating a gone process succeeds
    assert_ok!(supervisor.terminate(&handle).await);

    logs.delete().await.unwrap();
}

#[tokio::test]
async fn test_runner_receives_environment() {
    let logs = Dir::create_temp_dir("deployd-logs").await.unwrap();
    let supervisor = OsSupervisor::new(
        template("sh", &["-c", "echo \"$DEPLOY_ID $DEPLOY_CONFIG_REF $DEPLOY_PORT {port}\""]),
        Some(logs.clone()),
        Duration::from_secs(1),
    );

    let handle = assert_ok!(supervisor.spawn(&request("d-env")).await);
    assert!(wait_dead(&supervisor, &handle).await);

    let output = tokio::fs::read_to_string(logs.path().join("d-env.log"))
        .await
        .unwrap();
    assert_eq!(output.trim(), "d-env alice-bot 8502 8502");

    logs.delete().await.unwrap();
}

#[tokio::test]
async fn test_missing_program_fails_spawn() {
    let supervisor = OsSupervisor::new(
        template("/nonexistent/deployd-runner", &[]),
        None,
        Duration::from_secs(1),
    );

    let err = assert_err!(supervisor.spawn(&request("d-missing")).await);
    assert_eq!(err.kind(), ErrorKind::SpawnFailed);
}

#[tokio::test]
async fn test_foreign_supervisor_observes_and_stops_process() {
    let owner = OsSupervisor::new(template("sleep", &["30"]), None, Duration::from_secs(2));
    let handle = assert_ok!(owner.spawn(&request("d-foreign")).await);

    // a second supervisor stands in for a restarted orchestrator
    let other = OsSupervisor::new(RunnerTemplate::default(), None, Duration::from_secs(2));
    assert!(other.is_alive(&handle).await);

    if let Some(started_at) = handle.os_started_at {
        let recycled = ProcessHandle::new(handle.pid, Some(started_at + 1000));
        assert!(!other.is_alive(&recycled).await);
    }

    assert_ok!(other.terminate(&handle).await);
    assert!(!other.is_alive(&handle).await);
    assert!(wait_dead(&owner, &handle).await);
}
