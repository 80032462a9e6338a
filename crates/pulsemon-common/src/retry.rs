//! Bounded retry with a fixed delay schedule.
//!
//! The schedule lists the pauses between attempts, so a schedule of length
//! `n` allows at most `n + 1` attempts. Only errors the caller classifies as
//! transient are retried; anything else is returned after the attempt that
//! produced it.

use std::future::Future;
use std::time::Duration;

/// Default pauses between attempts: 1s, 3s, 5s.
pub const DEFAULT_SCHEDULE_MS: [u64; 3] = [1000, 3000, 5000];

/// Builds a schedule from millisecond values, as stored in config files.
///
/// # Examples
///
/// ```
/// use pulsemon_common::retry::schedule_from_millis;
/// use std::time::Duration;
///
/// let schedule = schedule_from_millis(&[1000, 3000]);
/// assert_eq!(schedule, vec![Duration::from_secs(1), Duration::from_secs(3)]);
/// ```
pub fn schedule_from_millis(millis: &[u64]) -> Vec<Duration> {
    millis.iter().copied().map(Duration::from_millis).collect()
}

/// The error of the last attempt together with how many attempts were made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: usize,
    pub source: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.source, self.attempts)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Runs an async operation, sleeping between transient failures according to
/// `schedule`.
pub async fn retry<T, E, F, Fut, P>(
    schedule: &[Duration],
    is_transient: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut delays = schedule.iter();
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => match delays.next() {
                Some(delay) => {
                    tracing::warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(RetryError { attempts, source: e }),
            },
            Err(e) => return Err(RetryError { attempts, source: e }),
        }
    }
}

/// Blocking counterpart of [`retry`] for synchronous callers such as the
/// SQLite backend.
pub fn retry_blocking<T, E, F, P>(
    schedule: &[Duration],
    is_transient: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    let mut delays = schedule.iter();
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) => match delays.next() {
                Some(delay) => {
                    tracing::warn!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "Transient failure, retrying");
                    std::thread::sleep(*delay);
                }
                None => return Err(RetryError { attempts, source: e }),
            },
            Err(e) => return Err(RetryError { attempts, source: e }),
        }
    }
}
