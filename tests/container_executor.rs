//! Container executor runs against a live Docker daemon.
//!
//! Run with `cargo test -- --ignored` on a machine with Docker.

use pyrun::config::ContainerConfig;
use pyrun::sandbox::{shared_engine, ContainerExecutor};
use pyrun::{CodeExecutor, ExecutionRequest};
use serde_json::json;
use std::time::{Duration, Instant};

async fn executor() -> ContainerExecutor {
    ContainerExecutor::new(&ContainerConfig::default()).await.unwrap()
}

async fn pyrun_containers() -> usize {
    use bollard::container::ListContainersOptions;
    use std::collections::HashMap;

    let docker = shared_engine().await.unwrap();
    let filters = HashMap::from([("name".to_string(), vec!["pyrun-".to_string()])]);
    docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_round_trip() {
    let executor = executor().await;

    let result = executor
        .execute(ExecutionRequest::new("print(2+2)").with_timeout_secs(60))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_eq!(result.output, json!("4"));
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_runs_unprivileged() {
    let executor = executor().await;

    let result = executor
        .execute(ExecutionRequest::new("import os, json; print(json.dumps([os.getuid()]))"))
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_ne!(result.output, json!([0]));
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_non_zero_exit() {
    let executor = executor().await;

    let result = executor
        .execute(ExecutionRequest::new("import sys; sys.exit(1)").with_timeout_secs(60))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.error.is_some());
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_timeout_kills_and_removes() {
    let executor = executor().await;
    // Pull outside the timed section.
    executor
        .execute(ExecutionRequest::new("pass"))
        .await
        .unwrap();

    let started = Instant::now();
    let result = executor
        .execute(
            ExecutionRequest::new("import time\nprint('started', flush=True)\ntime.sleep(60)")
                .with_timeout_secs(3),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(!result.success);
    assert!(result.timed_out);
    assert!(result.stdout.unwrap().contains("started"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pyrun_containers().await, 0);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon and network access"]
async fn test_container_installs_requirements_then_drops_privileges() {
    let executor = executor().await;

    let code = "import os, json, six\nprint(json.dumps([os.getuid(), six.__name__]))";
    let result = executor
        .execute(
            ExecutionRequest::new(code)
                .with_requirements(["six"])
                .with_timeout_secs(180),
        )
        .await
        .unwrap();

    assert!(result.success, "{:?}", result);
    assert_ne!(result.output[0], json!(0));
    assert_eq!(result.output[1], json!("six"));
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_container_failed_install_never_runs_code() {
    let executor = executor().await;

    let result = executor
        .execute(
            ExecutionRequest::new("print('ran')")
                .with_requirements(["/nonexistent/pyrun-missing-package"])
                .with_timeout_secs(180),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert!(!result.stdout.unwrap_or_default().contains("ran"));
}
