//! Poll-until-condition waits.
//!
//! Node-side events (relay, handshakes, reorgs) complete asynchronously with
//! respect to the driver, so every convergence point is an explicit poll of
//! an observable predicate rather than a fixed sleep.

use {
    crate::error::{HarnessError, Result},
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{thread, time::Duration},
};

/// How often and how many times a condition is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between two polls.
    pub interval_ms: u64,
    /// Polls before giving up; `None` polls forever.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub const fn bounded(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts: Some(max_attempts),
        }
    }

    pub const fn unbounded(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            max_attempts: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        // 60 s at 1 s intervals, the retry budget of the classic sync helpers.
        Self::bounded(1_000, 60)
    }
}

/// Poll `predicate` until it returns `true`.
///
/// Returns the number of polls it took. Errors from the predicate abort the
/// wait immediately; exhausting the budget yields [`HarnessError::SyncTimeout`].
pub fn wait_until<F>(what: &str, policy: &PollPolicy, mut predicate: F) -> Result<u32>
where
    F: FnMut() -> Result<bool>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        if predicate()? {
            debug!("{what}: satisfied after {attempts} poll(s)");
            return Ok(attempts);
        }
        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                warn!("{what}: still unsatisfied after {attempts} poll(s)");
                return Err(HarnessError::SyncTimeout {
                    what: what.to_string(),
                    attempts,
                });
            }
        }
        if policy.interval_ms > 0 {
            thread::sleep(policy.interval());
        }
    }
}
