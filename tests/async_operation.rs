// Integration tests for AsyncOperation
// These tests drive operations from spawned tasks on a multi-threaded runtime.
// Unit tests for individual methods are in src/operation.rs

use bookshelf::error::RunError;
use bookshelf::operation::{AsyncOperation, AsyncState, Status};
use std::future::Future;
use tokio::sync::oneshot;
use tokio::time::{Duration, timeout};

type Op = AsyncOperation<u32, String>;

fn gate() -> (
    oneshot::Sender<Result<u32, String>>,
    impl Future<Output = Result<u32, String>> + Send + 'static,
) {
    let (tx, rx) = oneshot::channel();
    (tx, async move { rx.await.unwrap_or_else(|_| Err("dropped".to_string())) })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_is_synchronous_and_resolution_is_observed() {
    let op = Op::new();
    let mut rx = op.subscribe();
    let (tx, future) = gate();

    let run = tokio::spawn(op.run(future));
    assert_eq!(op.status(), Status::Pending);
    assert!(op.is_loading());

    tx.send(Ok(7)).expect("operation is waiting");
    let result = timeout(Duration::from_secs(1), run)
        .await
        .expect("settles within timeout")
        .expect("task should not panic");
    assert_eq!(result, Ok(7));

    rx.wait_for(|state| state.is_success())
        .await
        .expect("sender alive");
    assert_eq!(op.state(), AsyncState::resolved(7));
}

#[tokio::test]
async fn test_rejection_is_stored_and_returned() {
    let op = Op::new();
    let (tx, future) = gate();
    let run = op.run(future);

    tx.send(Err("nope".to_string())).expect("operation is waiting");
    assert_eq!(run.await, Err("nope".to_string()));

    let state = op.state();
    assert_eq!(state.status, Status::Rejected);
    assert_eq!(state.data, None);
    assert_eq!(state.error, Some("nope".to_string()));
}

#[tokio::test]
async fn test_reset_restores_construction_snapshot() {
    let initial = AsyncState {
        status: Status::Resolved,
        data: Some(1),
        error: None,
    };
    let op = Op::with_initial(initial.clone());

    op.run(async { Err("boom".to_string()) }).await.expect_err("rejects");
    op.set_data(99);
    op.reset();
    assert_eq!(op.state(), initial);
}

#[test]
fn test_missing_future_fails_before_transition() {
    let op = Op::new();
    let result = op.try_run(None::<std::future::Ready<Result<u32, String>>>);
    assert!(matches!(result, Err(RunError::MissingFuture)));
    assert_eq!(op.status(), Status::Idle);
}

#[tokio::test]
async fn test_no_transition_after_unmount() {
    let op = Op::new();
    let mut rx = op.subscribe();
    let (tx, future) = gate();
    let run = tokio::spawn(op.run(future));
    rx.mark_unchanged();

    op.unmount();
    tx.send(Ok(3)).expect("operation is waiting");

    // The caller still gets the outcome; the state does not move.
    assert_eq!(run.await.expect("task should not panic"), Ok(3));
    assert_eq!(op.status(), Status::Pending);
    assert!(!rx.has_changed().expect("sender alive"));
}
