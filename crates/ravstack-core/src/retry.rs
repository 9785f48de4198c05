use std::cell::Cell;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tracing::{debug, error, warn};

use crate::error::{ApiError, RetryRequested, RetryTimeout};

/// Time source for retry loops and expiration checks.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
    /// Wall-clock time in milliseconds since the Unix epoch.
    fn unix_millis(&self) -> i64;
}

/// The real clock: blocking sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn unix_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when slept on. Used to drive retry loops in
/// tests without waiting.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    unix_start: i64,
    offset: Cell<Duration>,
    slept: Cell<u32>,
}

impl ManualClock {
    pub fn new(unix_start: i64) -> Self {
        Self {
            start: Instant::now(),
            unix_start,
            offset: Cell::new(Duration::ZERO),
            slept: Cell::new(0),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// Number of `sleep` calls so far.
    pub fn sleeps(&self) -> u32 {
        self.slept.get()
    }

    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + 1);
        self.advance(duration);
    }

    fn unix_millis(&self) -> i64 {
        self.unix_start + self.offset.get().as_millis() as i64
    }
}

/// How long to keep trying, and how often each HTTP status may be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// HTTP status -> number of attempts that may fail with it. Statuses not
    /// listed are fatal on first sight.
    pub max_retries: BTreeMap<u16, u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// A policy retrying conflicts (409) up to 10 times.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: BTreeMap::from([(409, 10)]),
        }
    }

    /// Policy for power and boot-device changes. 400 means the application
    /// is busy with another action, though Ravello mostly answers 409.
    pub fn power() -> Self {
        Self::new(Duration::from_secs(1200)).with_statuses(&[(400, 3), (403, 3), (409, 3)])
    }

    pub fn with_statuses(mut self, statuses: &[(u16, u32)]) -> Self {
        self.max_retries = statuses.iter().copied().collect();
        self
    }

    /// Base pause between attempts: 1% of the timeout, kept within 2..=10s.
    pub fn delay(&self) -> Duration {
        let secs = (self.timeout.as_secs_f64() / 100.0).clamp(2.0, 10.0);
        Duration::from_secs_f64(secs)
    }
}

/// Per-attempt state handed to the retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    pub elapsed: Duration,
}

impl Attempt {
    /// Whether an earlier attempt already ran. Operations reload remote
    /// state when this is true.
    pub fn is_retry(&self) -> bool {
        self.number > 1
    }
}

/// Run `op` until it succeeds, a fatal error occurs, or the policy's
/// timeout passes.
///
/// - `Ok` ends the loop.
/// - [`RetryRequested`] is retried without limit.
/// - [`ApiError`] with a status listed in the policy is retried until that
///   status has failed as many times as allowed, then returned.
/// - Anything else is returned immediately.
///
/// Attempts are separated by [`RetryPolicy::delay`] plus up to one second
/// of random jitter.
pub fn retry_operation<T, F>(
    policy: &RetryPolicy,
    label: &str,
    clock: &dyn Clock,
    mut op: F,
) -> Result<T>
where
    F: FnMut(&Attempt) -> Result<T>,
{
    let start = clock.now();
    let deadline = start + policy.timeout;
    let mut tries: BTreeMap<u16, u32> = BTreeMap::new();
    let mut number = 0;

    while clock.now() < deadline {
        number += 1;
        let attempt = Attempt {
            number,
            elapsed: clock.now() - start,
        };
        let err = match op(&attempt) {
            Ok(value) => {
                debug!(
                    attempts = number,
                    seconds = format!("{:.2}", attempt.elapsed.as_secs_f64()),
                    "{} succeeded",
                    label
                );
                return Ok(value);
            }
            Err(err) => err,
        };

        if let Some(api) = err.downcast_ref::<ApiError>() {
            let Some(&max) = policy.max_retries.get(&api.status) else {
                return Err(err);
            };
            debug!(error = %api, "{}: retry", label);
            let count = tries.entry(api.status).or_insert(0);
            *count += 1;
            if *count >= max {
                error!(status = api.status, max, "Max retries reached for {}", label);
                return Err(err);
            }
            warn!(
                status = api.status,
                "Retry number {} out of {} for {}", count, max, label
            );
        } else if let Some(requested) = err.downcast_ref::<RetryRequested>() {
            warn!("Retry requested for {}: {}", label, requested);
        } else {
            return Err(err);
        }

        let pause = policy.delay() + Duration::from_secs_f64(rand::random::<f64>());
        debug!(
            seconds = format!("{:.2}", pause.as_secs_f64()),
            "{}: sleeping", label
        );
        clock.sleep(pause);
    }

    Err(RetryTimeout {
        label: label.to_string(),
        elapsed: clock.now() - start,
    }
    .into())
}
