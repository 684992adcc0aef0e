//! Bounded polling.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::error::ProbeError;

/// `from + timeout`, or `None` when the sum does not fit in an `Instant`.
///
/// A `None` deadline never expires.
pub fn deadline_after(from: Instant, timeout: Duration) -> Option<Instant> {
    from.checked_add(timeout)
}

/// Polls a condition at a fixed interval until it holds, the timeout elapses, or
/// the optional cancellation flag is raised.
#[derive(Debug, Clone)]
pub struct Poller {
    timeout: Duration,
    interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl Poller {
    /// Creates a poller without a cancellation flag.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            cancel: None,
        }
    }

    /// Aborts polling with [`ProbeError::Interrupted`] once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Runs `predicate` until it returns `Ok(true)`.
    ///
    /// The predicate is evaluated at least once, even with a zero timeout. An `Err`
    /// from the predicate ends polling immediately and is passed through.
    pub fn until<F>(&self, condition: &str, mut predicate: F) -> Result<Duration, ProbeError>
    where
        F: FnMut() -> Result<bool, ProbeError>,
    {
        let started = Instant::now();
        let deadline = deadline_after(started, self.timeout);

        loop {
            if self
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
            {
                return Err(ProbeError::Interrupted);
            }

            if predicate()? {
                let elapsed = started.elapsed();
                debug!("Condition '{condition}' met after {elapsed:?}");
                return Ok(elapsed);
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(ProbeError::TimeoutError {
                        condition: condition.to_string(),
                        timeout: self.timeout,
                    });
                }
                Some(deadline) => self.interval.min(deadline - now),
                None => self.interval,
            };

            thread::sleep(pause);
        }
    }
}

/// Polls `predicate` every `interval` until it holds or `timeout` elapses.
pub fn wait_until<F>(
    predicate: F,
    timeout: Duration,
    interval: Duration,
    condition: &str,
) -> Result<Duration, ProbeError>
where
    F: FnMut() -> Result<bool, ProbeError>,
{
    Poller::new(timeout, interval).until(condition, predicate)
}
