use std::future::Future;
use std::time::Duration;

use log::info;
use tokio::time::{self, Instant};

use crate::error::Result;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed cadence polling: no backoff, the control plane propagates state
/// changes with a roughly constant delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollPolicy {
    pub fn new(deadline: Duration) -> Self {
        PollPolicy {
            interval: DEFAULT_INTERVAL,
            deadline,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Result of a single check.
pub enum Poll<T, P> {
    Ready(T),
    /// Not there yet; `P` describes what is still outstanding.
    Pending(P),
}

/// Result of a whole polling loop that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T, P> {
    Ready(T),
    /// The deadline passed; carries the last outstanding description.
    Expired(P),
}

/// Sleeps `policy.interval`, runs `check`, and repeats until it is ready or
/// the deadline has passed. The last sleep is cut short so the final check
/// lands on the deadline. An error from `check` ends the loop at once.
pub async fn poll_until<T, P, F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut check: F,
) -> Result<Outcome<T, P>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T, P>>>,
{
    let end = Instant::now() + policy.deadline;
    loop {
        let pause = policy.interval.min(end.saturating_duration_since(Instant::now()));
        info!("wait on {}. Sleeping {} ms. zzz...", what, pause.as_millis());
        time::sleep(pause).await;

        match check().await? {
            Poll::Ready(value) => return Ok(Outcome::Ready(value)),
            Poll::Pending(outstanding) => {
                if Instant::now() >= end {
                    return Ok(Outcome::Expired(outstanding));
                }
            }
        }
    }
}
