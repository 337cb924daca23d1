//! Poll-until-condition waiting

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::error::ScreenshotResult;

/// How long and how often to look for a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two probes
    pub interval: Duration,

    /// Total time after the first probe before giving up
    pub max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_wait: Duration::from_millis(500),
        }
    }
}

/// Outcome of a poll, with the number of probes it took
#[derive(Debug, Clone, PartialEq)]
pub struct Polled<T> {
    pub value: Option<T>,
    pub attempts: usize,
    pub waited: Duration,
}

/// Probe until it yields `Some`, or until `policy.max_wait` has elapsed
///
/// The probe always runs at least once, and once more after the deadline
/// passes so a condition met during the last sleep is not missed. Probe errors
/// end the poll immediately.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut probe: F) -> ScreenshotResult<Polled<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ScreenshotResult<Option<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        if let Some(value) = probe().await? {
            return Ok(Polled {
                value: Some(value),
                attempts,
                waited: start.elapsed(),
            });
        }

        let elapsed = start.elapsed();
        if elapsed >= policy.max_wait {
            debug!("Condition not met after {} attempt(s) in {:?}", attempts, elapsed);
            return Ok(Polled {
                value: None,
                attempts,
                waited: elapsed,
            });
        }

        let remaining = policy.max_wait - elapsed;
        sleep(policy.interval.min(remaining)).await;
    }
}
