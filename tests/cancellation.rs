mod common;

use common::test_helpers::{executor, failing, flaky, wait_until, RetryTimes, TestError};
use hedgerow::{AttemptPhase, ExecutorEvent, NeverRetry, Work};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn cancel_pulls_the_pending_retry() {
    let (exec, sink) = executor();
    let (work, calls) = failing();
    let handle = exec.submit(work, RetryTimes::new(5, Duration::from_millis(200)));

    assert!(wait_until(Duration::from_secs(5), || exec.pending_retries() == 1));
    assert_eq!(handle.phases(), [AttemptPhase::RetryScheduled]);
    assert!(handle.cancel());
    assert_eq!(exec.pending_retries(), 0);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handle.is_cancelled());
    assert_eq!(handle.phases(), [AttemptPhase::Cancelled]);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ExecutorEvent::Cancelled { removed_pending: true, .. })));

    let err = handle.get().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.suppressed(), [TestError::new("fail-0")]);
}

#[test]
fn cancel_after_completion_is_a_no_op() {
    let (exec, _sink) = executor();
    let (work, _) = flaky(0, 3u32);
    let handle = exec.submit(work, NeverRetry);
    assert!(handle.wait_for(Duration::from_secs(5)));
    assert!(!handle.cancel());
    assert!(!handle.is_cancelled());
    assert_eq!(handle.get().unwrap(), 3);
}

#[test]
fn cancel_while_running_discards_the_late_result() {
    let (exec, _sink) = executor();
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let decided = Arc::new(AtomicUsize::new(0));
    let work = {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        Work::new(move || -> Result<u32, TestError> {
            started.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(1)
        })
    };
    let decide = {
        let decided = Arc::clone(&decided);
        move |_: &Result<u32, TestError>,
              _: &Work<u32, TestError>|
              -> Result<hedgerow::Decision<u32, TestError>, hedgerow::DecisionError> {
            decided.fetch_add(1, Ordering::SeqCst);
            Ok(hedgerow::Decision::abort())
        }
    };
    let handle = exec.submit(work, decide);
    assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst)));

    assert!(handle.cancel());
    release.store(true, Ordering::SeqCst);
    assert!(handle.get().unwrap_err().is_cancelled());

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(decided.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_cancel_and_completion_have_one_winner() {
    let (exec, _sink) = executor();
    for _ in 0..50 {
        let (work, _) = flaky(0, 5u32);
        let handle = exec.submit(work, NeverRetry);
        let cancelled = handle.cancel();
        match handle.get() {
            Ok(v) => {
                assert!(!cancelled);
                assert_eq!(v, 5);
            }
            Err(err) => {
                assert!(cancelled);
                assert!(err.is_cancelled());
            }
        }
    }
}

#[test]
fn dropping_the_handle_does_not_cancel() {
    let (exec, _sink) = executor();
    let (work, calls) = flaky(1, 0u32);
    drop(exec.submit(work, RetryTimes::new(1, Duration::from_millis(5))));
    assert!(wait_until(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 2));
}
