//! Drain detection after navigation.
//!
//! This is a heuristic. The stream counts as quiet once every observed
//! response has been processed *and* a fixed quiet period has passed since
//! navigation finished. A response that starts after that point is not
//! waited for; that is accepted behaviour, not a guaranteed drain.

use crate::accumulator::{CaptureAccumulator, DrainProgress};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(5);
pub const DEFAULT_CEILING: Duration = Duration::from_secs(60);

/// How waiting for the response stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Everything observed was processed and the quiet period elapsed.
    Complete(DrainProgress),
    /// The ceiling elapsed first. Non-fatal.
    TimedOut(DrainProgress),
    Interrupted,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionDetector {
    pub poll_interval: Duration,
    pub quiet_period: Duration,
    pub ceiling: Duration,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            quiet_period: DEFAULT_QUIET_PERIOD,
            ceiling: DEFAULT_CEILING,
        }
    }
}

impl CompletionDetector {
    /// Poll `accumulator` until drained, timed out, or cancelled.
    ///
    /// `navigated_at` marks when navigation completed; the ceiling is counted
    /// from the moment this is called.
    pub async fn wait(
        &self,
        accumulator: &CaptureAccumulator,
        navigated_at: Instant,
        cancel: &CancellationToken,
    ) -> Completion {
        let deadline = Instant::now() + self.ceiling;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Completion::Interrupted,
                _ = ticker.tick() => {}
            }

            let progress = accumulator.progress();
            if Instant::now() >= deadline {
                warn!(
                    processed = progress.processed,
                    observed = progress.observed,
                    "timeout waiting for all responses to be processed"
                );
                return Completion::TimedOut(progress);
            }
            if progress.is_drained() && navigated_at.elapsed() >= self.quiet_period {
                debug!(
                    processed = progress.processed,
                    observed = progress.observed,
                    "response stream drained"
                );
                return Completion::Complete(progress);
            }
        }
    }
}
