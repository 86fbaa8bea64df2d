use hedgerow::{Decide, Decision, DecisionError, MemorySink, RetryExecutor, ThreadPerJob, Work};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub String);

impl TestError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Executor on one-thread-per-job workers, recording events into the returned sink.
pub fn executor() -> (RetryExecutor, MemorySink) {
    let sink = MemorySink::new();
    let exec = RetryExecutor::builder()
        .submitter(ThreadPerJob::new("test-worker"))
        .event_sink(sink.clone())
        .idle_wait(Duration::from_millis(50))
        .build()
        .expect("executor");
    (exec, sink)
}

/// Work that fails `fail_first` times with "fail-N", then returns `value`.
pub fn flaky<T>(fail_first: usize, value: T) -> (Work<T, TestError>, Arc<AtomicUsize>)
where
    T: Clone + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let work = Work::new(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < fail_first {
            Err(TestError(format!("fail-{}", n)))
        } else {
            Ok(value.clone())
        }
    });
    (work, calls)
}

/// Work that always fails, counting invocations.
pub fn failing() -> (Work<u32, TestError>, Arc<AtomicUsize>) {
    flaky(usize::MAX, 0)
}

/// Retries every failure `times` times after `delay`, then aborts with the actual outcome.
#[derive(Debug, Clone)]
pub struct RetryTimes {
    remaining: usize,
    delay: Duration,
}

impl RetryTimes {
    pub fn new(times: usize, delay: Duration) -> Self {
        Self { remaining: times, delay }
    }
}

impl<T: 'static> Decide<T, TestError> for RetryTimes {
    fn decide(
        &mut self,
        outcome: &Result<T, TestError>,
        _work: &Work<T, TestError>,
    ) -> Result<Decision<T, TestError>, DecisionError> {
        if outcome.is_err() && self.remaining > 0 {
            self.remaining -= 1;
            Ok(Decision::retry(self.delay))
        } else {
            Ok(Decision::abort())
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let limit = Instant::now() + timeout;
    while Instant::now() < limit {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Route executor logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
