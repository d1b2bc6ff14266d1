//! Retry an operation until it succeeds or a stop condition fires.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Bookkeeping for a single attempt, handed to the operation and the hook.
#[derive(Debug, Clone, Copy)]
pub struct Attempt {
    pub number: u32,
    pub started_at: Instant,
}

impl Attempt {
    /// How long the attempt ran before failing.
    pub fn healthy_for(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// The condition stopped retrying before the operation succeeded.
#[derive(Debug)]
pub struct Stopped<E> {
    pub attempts: u32,
    pub last_error: Option<E>,
}

/// Run `op` until it returns `Ok` or `condition` turns false.
///
/// `condition` is checked before every attempt and again after a failure;
/// `between` runs after each failure while the condition still holds, and is
/// where backoff and other side effects go.
pub async fn retry_until<T, E, Op, OpFut, Cond, Hook, HookFut>(
    mut op: Op,
    mut condition: Cond,
    mut between: Hook,
) -> Result<T, Stopped<E>>
where
    Op: FnMut(Attempt) -> OpFut,
    OpFut: Future<Output = Result<T, E>>,
    Cond: FnMut() -> bool,
    Hook: FnMut(&E, &Attempt) -> HookFut,
    HookFut: Future<Output = ()>,
{
    let mut attempts = 0;
    let mut last_error = None;

    while condition() {
        attempts += 1;
        let attempt = Attempt {
            number: attempts,
            started_at: Instant::now(),
        };
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if condition() {
                    between(&err, &attempt).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(Stopped {
        attempts,
        last_error,
    })
}

/// Doubling backoff that resets once an attempt outlives the current window.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// The delay to wait after an attempt that stayed up for `healthy_for`.
    pub fn next_delay(&mut self, healthy_for: Duration) -> Duration {
        if healthy_for > self.current {
            self.current = self.base;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Window the next failure will be measured against.
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Sleep for `delay` unless `token` fires first. Returns false when cancelled.
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
