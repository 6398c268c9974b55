//! End-to-end supervision scenarios
//!
//! Drives vodpub-process through the public registry API with real
//! subprocesses: deadline stop, natural exit, isolation between siblings.

#![cfg(unix)]

use std::time::{Duration, Instant};

use tokio_stream::StreamExt;
use vodpub_process::{
    CommandSpec, FailureKind, Lifecycle, Status, StopReason, SupervisorError, SupervisorRegistry,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn spec(program: &str, args: &[&str]) -> CommandSpec {
    CommandSpec::new(program, args.iter().copied()).unwrap()
}

#[tokio::test]
async fn test_deadline_stops_long_running_process() {
    init_tracing();
    let registry = SupervisorRegistry::new();
    registry.register("a", spec("sleep", &["5"])).await.unwrap();

    let started = Instant::now();
    let statuses: Vec<Status> = registry
        .start_one("a", Some(Duration::from_secs(1)))
        .await
        .unwrap()
        .collect()
        .await;
    let elapsed = started.elapsed();

    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert_eq!(status.name, "a");
    assert!(!status.complete);
    assert!(status.failure.is_none());
    assert_eq!(status.stop_reason, Some(StopReason::Deadline));
    assert!(
        (status.runtime_seconds - 1.0).abs() < 0.5,
        "runtime {}",
        status.runtime_seconds
    );
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test]
async fn test_natural_exit_without_deadline() {
    init_tracing();
    let registry = SupervisorRegistry::new();
    registry.register("b", spec("true", &[])).await.unwrap();

    let statuses: Vec<Status> = registry
        .start_one("b", None)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(statuses.len(), 1);
    let status = &statuses[0];
    assert!(status.complete);
    assert_eq!(status.exit_code, 0);
    assert!(status.failure.is_none());
    assert!(status.pid > 0);
    assert_eq!(status.lifecycle, Lifecycle::Done);
}

#[tokio::test]
async fn test_killing_one_leaves_siblings_untouched() {
    init_tracing();
    let registry = SupervisorRegistry::new();
    for i in 0..4 {
        registry
            .register(format!("ok-{}", i), spec("sh", &["-c", "sleep 0.3; echo done"]))
            .await
            .unwrap();
    }
    registry.register("victim", spec("sleep", &["10"])).await.unwrap();

    let stream = registry.start_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    registry.stop_one("victim").await.unwrap();

    let statuses: Vec<Status> = stream.collect().await;
    assert_eq!(statuses.len(), 5);

    for status in &statuses {
        if status.name == "victim" {
            assert!(!status.complete);
            assert!(status.failure.is_none());
            assert_eq!(status.stop_reason, Some(StopReason::Requested));
        } else {
            assert!(status.complete, "{} not complete", status.name);
            assert_eq!(status.exit_code, 0);
            assert_eq!(status.stdout.to_vec(), ["done"]);
        }
    }
}

#[tokio::test]
async fn test_start_failure_does_not_affect_siblings() {
    init_tracing();
    let registry = SupervisorRegistry::new();
    registry
        .register("missing", spec("/nonexistent/vodpub-encoder", &[]))
        .await
        .unwrap();
    registry.register("fine", spec("echo", &["ok"])).await.unwrap();

    let statuses: Vec<Status> = registry.start_all().await.collect().await;
    assert_eq!(statuses.len(), 2);

    let missing = statuses.iter().find(|s| s.name == "missing").unwrap();
    assert!(!missing.complete);
    assert_eq!(
        missing.failure.as_ref().map(|f| f.kind),
        Some(FailureKind::StartFailure)
    );

    let fine = statuses.iter().find(|s| s.name == "fine").unwrap();
    assert!(fine.complete);
    assert_eq!(fine.stdout.to_vec(), ["ok"]);
}

#[tokio::test]
async fn test_query_during_and_after_run() {
    init_tracing();
    let registry = SupervisorRegistry::new();
    registry.register("q", spec("sleep", &["10"])).await.unwrap();

    let stream = registry.start_one("q", None).await.unwrap();
    let running = registry.query("q").await.unwrap();
    assert!(running.pid > 0);
    assert!(running.started_at.is_some());
    assert!(running.stopped_at.is_none());
    assert_eq!(running.runtime_seconds, 0.0);

    registry.stop_one("q").await.unwrap();
    registry.stop_one("q").await.unwrap();
    let statuses: Vec<Status> = stream.collect().await;

    assert_eq!(statuses.len(), 1);
    assert_eq!(registry.query("q").await.unwrap(), statuses[0]);
}

#[tokio::test]
async fn test_usage_errors() {
    let registry = SupervisorRegistry::new();
    registry.register("dup", spec("true", &[])).await.unwrap();

    assert!(matches!(
        registry.register("dup", spec("true", &[])).await,
        Err(SupervisorError::DuplicateName { .. })
    ));
    assert!(matches!(
        registry.query("nope").await,
        Err(SupervisorError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_status_is_serializable() {
    let registry = SupervisorRegistry::new();
    registry.register("json", spec("echo", &["hello"])).await.unwrap();

    let statuses: Vec<Status> = registry.start_all().await.collect().await;
    let json = serde_json::to_value(&statuses[0]).unwrap();

    assert_eq!(json["name"], "json");
    assert_eq!(json["complete"], true);
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["stdout"], serde_json::json!(["hello"]));
    assert!(json["failure"].is_null());
}
