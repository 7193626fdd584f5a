use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::Error;

/// Controls how operations are retried after transient failures.
///
/// The delay before retry `n` (starting at 1) is `initial_delay * multiplier^(n-1)` plus a
/// random jitter, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub(crate) initial_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) max_delay: Duration,
    pub(crate) jitter: Duration,
    pub(crate) max_read_retries: u32,
    pub(crate) max_mutate_retries: u32,
    pub(crate) timeout: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Duration::from_millis(100),
            max_read_retries: 10,
            max_mutate_retries: 3,
            timeout: None,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Upper bound of the random delay added to every backoff.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// How many consecutive failed attempts a read tolerates.
    pub fn max_read_retries(mut self, retries: u32) -> Self {
        self.max_read_retries = retries;
        self
    }

    /// How many times a mutation is re-sent after its first attempt.
    pub fn max_mutate_retries(mut self, retries: u32) -> Self {
        self.max_mutate_retries = retries;
        self
    }

    /// Bounds the total duration of an operation, all attempts and backoffs included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The delay to wait before the given retry, `retry` starting at 1.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.jitter)
        };
        let delay = if base.is_finite() && base < self.max_delay.as_nanos() as f64 {
            Duration::from_nanos(base as u64) + jitter
        } else {
            self.max_delay
        };
        delay.min(self.max_delay)
    }
}

/// The instant after which an operation must give up, if it is bounded.
pub(crate) fn deadline(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| Instant::now() + timeout)
}

pub(crate) fn expired(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(deadline) if Instant::now() >= deadline)
}

/// Runs `future` to completion, or until `deadline`.
///
/// Returns `None` if the deadline passed first; `future` is then dropped.
pub(crate) async fn until<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

pub(crate) fn deadline_exceeded(last_error: Option<Error>) -> Error {
    last_error.unwrap_or_else(|| {
        Error::Status(tonic::Status::deadline_exceeded(
            "operation timed out before completing",
        ))
    })
}

/// Calls a unary, idempotent RPC until it succeeds, fails with a non-retryable error, runs out of
/// retries or passes the deadline.
///
/// `call` receives the attempt number, starting at 0.
pub(crate) async fn retry_idempotent<T, F, Fut>(
    settings: &RetrySettings,
    max_retries: u32,
    timeout: Option<Duration>,
    mut call: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let deadline = deadline(timeout);
    let mut attempt = 0;
    let mut last_error = None;
    loop {
        let error = match until(deadline, call(attempt)).await {
            Some(Ok(value)) => return Ok(value),
            Some(Err(error)) => error,
            None => return Err(deadline_exceeded(last_error)),
        };
        if !error.is_retryable() || attempt >= max_retries || expired(deadline) {
            log::debug!("giving up after attempt {}: {}", attempt, error);
            return Err(error);
        }
        attempt += 1;
        let delay = settings.backoff(attempt);
        log::debug!("attempt {} failed ({}), retrying in {:?}", attempt - 1, error, delay);
        if until(deadline, tokio::time::sleep(delay)).await.is_none() {
            return Err(error);
        }
        last_error = Some(error);
    }
}
