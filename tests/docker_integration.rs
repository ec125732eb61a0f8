//! Integration tests against a live Docker daemon.
//!
//! These tests create real containers from `alpine:3.19`.
//! Run with: cargo test --test docker_integration -- --ignored

use std::time::Duration;

use dockrun::execution::{
    ContainerRunner, ContainerState, DockerClient, RunRequest, RunStatus, DEFAULT_PULL_TIMEOUT,
};
use tokio::time::Instant;

const IMAGE: &str = "alpine:3.19";

async fn create_test_runner() -> ContainerRunner {
    let client = DockerClient::new().expect("Docker client should connect");
    client.ping().await.expect("Docker daemon must be running");
    let runner = ContainerRunner::new(client);
    assert!(
        runner.pull_image(IMAGE, DEFAULT_PULL_TIMEOUT).await,
        "Should pull {IMAGE}"
    );
    runner
}

fn unique_name(prefix: &str) -> String {
    format!("dockrun-it-{prefix}-{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Run with: cargo test --test docker_integration -- --ignored
async fn test_run_to_completion() {
    let runner = create_test_runner().await;
    let name = unique_name("echo");

    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("echo hello")
        .with_max_execution_time_ms(30_000)
        .build()
        .expect("valid request");

    let result = runner.run(&request).await;

    assert_eq!(result.status, RunStatus::Success, "result: {result:?}");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout().trim(), "hello");
    assert!(result.execution_duration.is_some());
    assert!(!runner.is_present(&name).await, "Container should be removed");
}

#[tokio::test]
#[ignore]
async fn test_run_with_failing_command() {
    let runner = create_test_runner().await;
    let name = unique_name("fail");

    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("false")
        .with_max_execution_time_ms(30_000)
        .build()
        .expect("valid request");

    let result = runner.run(&request).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.exit_code, 1);
    assert!(!runner.is_present(&name).await);
}

#[tokio::test]
#[ignore]
async fn test_run_times_out() {
    let runner = create_test_runner().await;
    let name = unique_name("sleep");

    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("sleep 60")
        .with_max_execution_time_ms(3_000)
        .build()
        .expect("valid request");

    let started = Instant::now();
    let result = runner.run(&request).await;

    assert_eq!(result.status, RunStatus::Timeout);
    assert_eq!(result.exit_code, -1);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(!runner.is_present(&name).await);
}

#[tokio::test]
#[ignore]
async fn test_detached_run_keeps_container() {
    let runner = create_test_runner().await;
    let name = unique_name("detached");

    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("sleep 30")
        .build()
        .expect("valid request");

    let result = runner.run(&request).await;

    assert!(result.is_success());
    assert!(result.detached);
    assert!(result.logs.is_none());
    assert!(runner.is_active(&name).await);

    assert!(runner.stop_and_remove(&name).await);
    assert_eq!(runner.container_state(&name).await, ContainerState::Unknown);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_container_handling() {
    let runner = create_test_runner().await;
    let name = unique_name("dup");
    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("sleep 30")
        .build()
        .expect("valid request");

    let first = runner.create_container(&request, false).await;
    assert!(first.is_some());
    assert!(runner.create_container(&request, false).await.is_none());
    assert_eq!(runner.container_id(&name).await, first);

    let second = runner.create_container(&request, true).await;
    assert!(second.is_some());
    assert_ne!(second, first);

    assert!(runner.remove_container(&name).await);
    assert!(!runner.remove_container(&name).await);
}

#[tokio::test]
#[ignore]
async fn test_wait_exec_and_duration() {
    let runner = create_test_runner().await;
    let name = unique_name("exec");
    let request = RunRequest::builder(&name, IMAGE)
        .with_cmd("sleep 2")
        .build()
        .expect("valid request");

    assert!(runner.create_container(&request, true).await.is_some());
    assert!(runner.start_container(&name).await);

    let logs = runner
        .exec(&name, &["echo".to_string(), "inside".to_string()])
        .await
        .expect("exec should succeed");
    assert_eq!(logs.stdout.trim(), "inside");

    let exit_code = runner
        .wait_until_exit_or_timeout(&name, Instant::now() + Duration::from_secs(30))
        .await
        .expect("container should exit");
    assert_eq!(exit_code, 0);

    let duration = runner
        .execution_duration(&name)
        .await
        .expect("finished container has a duration");
    assert!(duration >= Duration::from_secs(1));

    assert!(runner.stop_and_remove(&name).await);
}

#[tokio::test]
#[ignore]
async fn test_network_and_volume_lifecycle() {
    let runner = create_test_runner().await;
    let network = unique_name("net");
    let volume = unique_name("vol");

    let id = runner.create_network(&network).await.expect("network created");
    assert_eq!(runner.create_network(&network).await, Some(id));
    assert!(runner.remove_network(&network).await);
    assert!(!runner.is_network_present(&network).await);

    assert!(runner.create_volume(&volume).await);
    assert!(runner.create_volume(&volume).await);
    assert!(runner.remove_volume(&volume).await);
    assert!(!runner.is_volume_present(&volume).await);
}
