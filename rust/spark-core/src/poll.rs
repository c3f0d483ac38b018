//! Bounded, cancellable polling.
//!
//! A probe is called until it yields a value, the limit is reached or the
//! cancellation token fires. There is no sleep after the final attempt.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollLimit {
    /// Stop after this many probe calls.
    Attempts(u32),
    /// Stop once this much time has passed since the first probe.
    Elapsed(Duration),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub limit: PollLimit,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    Done { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Runs `probe` (called with the 1-based attempt number) until it returns
/// `Ok(Some(_))`. A probe error ends the wait immediately.
pub async fn poll<T, E, F, Fut>(
    config: PollConfig,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled { attempts });
        }

        attempts += 1;
        if let Some(value) = probe(attempts).await? {
            return Ok(PollOutcome::Done { value, attempts });
        }

        let exhausted = match config.limit {
            PollLimit::Attempts(max) => attempts >= max,
            PollLimit::Elapsed(max) => started.elapsed() + config.interval > max,
        };
        if exhausted {
            return Ok(PollOutcome::Exhausted { attempts });
        }

        debug!(attempts, interval = ?config.interval, "Condition not met yet, waiting");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled { attempts }),
            _ = sleep(config.interval) => {}
        }
    }
}
