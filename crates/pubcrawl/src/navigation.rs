//! Page navigation with bounded retries and jittered backoff.

use crate::config::NavigationOptions;
use crate::driver::PageDriver;
use crate::error::NavigationError;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pause between a timed-out attempt and the next one.
pub const DEFAULT_BACKOFF: (Duration, Duration) =
    (Duration::from_millis(1300), Duration::from_millis(3100));

/// Pause after a successful load when no fixed delay is configured.
pub const DEFAULT_POST_LOAD: (Duration, Duration) =
    (Duration::from_millis(700), Duration::from_millis(1300));

/// Uniformly random duration in `[min, max)`; `min` when the range is empty.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::thread_rng().gen_range(min.as_secs_f64()..max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Outcome of a successful navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationReport {
    pub attempts: u32,
    pub post_load_delay: Duration,
}

/// Drives `goto` until it succeeds, a non-timeout error occurs, or attempts run out.
#[derive(Debug, Clone)]
pub struct NavigationController {
    options: NavigationOptions,
    backoff: (Duration, Duration),
    post_load_delay: Duration,
}

impl NavigationController {
    /// The post-load delay is fixed here, once per session.
    pub fn new(options: NavigationOptions) -> Self {
        let post_load_delay = options
            .post_load_delay
            .unwrap_or_else(|| jitter(DEFAULT_POST_LOAD.0, DEFAULT_POST_LOAD.1));
        Self {
            options,
            backoff: DEFAULT_BACKOFF,
            post_load_delay,
        }
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = (min, max);
        self
    }

    pub fn post_load_delay(&self) -> Duration {
        self.post_load_delay
    }

    /// Navigate `page` to `url`.
    ///
    /// Each attempt increments `requests_sent` before it starts. Only
    /// timeouts are retried; any other driver error is returned at once.
    pub async fn navigate(
        &self,
        page: &dyn PageDriver,
        url: &str,
        requests_sent: &AtomicU64,
        cancel: &CancellationToken,
    ) -> Result<NavigationReport, NavigationError> {
        let max = self.options.max_retries;
        for attempt in 1..=max {
            requests_sent.fetch_add(1, Ordering::SeqCst);

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(NavigationError::Interrupted),
                r = page.goto(url, self.options.timeout, self.options.wait_until) => r,
            };

            match result {
                Ok(()) => {
                    info!(url, attempt, "page loaded");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NavigationError::Interrupted),
                        _ = tokio::time::sleep(self.post_load_delay) => {}
                    }
                    return Ok(NavigationReport {
                        attempts: attempt,
                        post_load_delay: self.post_load_delay,
                    });
                }
                Err(e) if e.is_timeout() => {
                    if attempt == max {
                        warn!(url, attempts = attempt, "max retries reached, unable to load the page");
                        break;
                    }
                    let wait = jitter(self.backoff.0, self.backoff.1);
                    warn!(
                        url,
                        "timeout occurred, retrying (attempt {attempt}/{max}) in {:.2}s",
                        wait.as_secs_f64()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NavigationError::Interrupted),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(e) => return Err(NavigationError::Fatal(e)),
            }
        }
        Err(NavigationError::RetriesExhausted { attempts: max })
    }
}
