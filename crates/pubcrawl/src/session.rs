//! End-to-end capture session.
//!
//! ```text
//! Init → BrowserReady → Navigating → AwaitingDrain → Finalized
//!   └──────────┴────────────┴─────────────┴──→ Aborted
//! ```
//!
//! Browser teardown runs on every path once a browser exists; its failures
//! are logged and never replace the session's own result.

use crate::accumulator::{CaptureAccumulator, ErrorTally};
use crate::classify::{CapturePolicy, Classifier};
use crate::completion::{Completion, CompletionDetector};
use crate::config::SessionConfig;
use crate::driver::{BrowserDriver, BrowserLauncher, ResponseHandle, ResponseSink};
use crate::error::SessionError;
use crate::navigation::NavigationController;
use crate::types::{CaptureReport, ReportMetadata, RequestTime};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    BrowserReady,
    Navigating,
    AwaitingDrain,
    Finalized,
    Aborted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::BrowserReady => write!(f, "browser-ready"),
            Self::Navigating => write!(f, "navigating"),
            Self::AwaitingDrain => write!(f, "awaiting-drain"),
            Self::Finalized => write!(f, "finalized"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One run: launch, capture, navigate, drain, report.
pub struct CaptureSession {
    config: SessionConfig,
    policy: Arc<CapturePolicy>,
    state: SessionState,
    accumulator: Arc<CaptureAccumulator>,
    tally: Arc<ErrorTally>,
    requests_sent: AtomicU64,
    detector: CompletionDetector,
    backoff: Option<(Duration, Duration)>,
    last_completion: Option<Completion>,
}

impl CaptureSession {
    /// Validate `config` and prepare a fresh session.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let policy = Arc::new(config.validate()?);
        Ok(Self {
            config,
            policy,
            state: SessionState::Init,
            accumulator: Arc::new(CaptureAccumulator::new()),
            tally: Arc::new(ErrorTally::new()),
            requests_sent: AtomicU64::new(0),
            detector: CompletionDetector::default(),
            backoff: None,
            last_completion: None,
        })
    }

    pub fn with_detector(mut self, detector: CompletionDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = Some((min, max));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::SeqCst)
    }

    /// How the drain wait ended, once the session got that far.
    pub fn completion(&self) -> Option<Completion> {
        self.last_completion
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Run the session to completion.
    ///
    /// Returns the report on success. Navigation failure, browser failure
    /// and interruption all leave the session `Aborted` with no report.
    pub async fn run(
        &mut self,
        launcher: &dyn BrowserLauncher,
        cancel: CancellationToken,
    ) -> Result<CaptureReport, SessionError> {
        let launched = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Interrupted),
            b = launcher.launch(&self.config.launch) => b.map_err(SessionError::Launch),
        };
        let browser = match launched {
            Ok(browser) => browser,
            Err(e) => {
                self.transition(SessionState::Aborted);
                return Err(e);
            }
        };

        let mut consumer = None;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(SessionError::Interrupted),
            r = self.drive(browser.as_ref(), &cancel, &mut consumer) => r,
        };

        match &result {
            Ok(_) => self.transition(SessionState::Finalized),
            Err(e) => {
                warn!("session aborted: {e}");
                self.transition(SessionState::Aborted);
            }
        }

        if let Err(e) = browser.close().await {
            warn!("error closing browser: {e}");
        }
        if let Some(task) = consumer {
            task.abort();
        }
        result
    }

    async fn drive(
        &mut self,
        browser: &dyn BrowserDriver,
        cancel: &CancellationToken,
        consumer: &mut Option<JoinHandle<()>>,
    ) -> Result<CaptureReport, SessionError> {
        let page = browser.new_page().await.map_err(SessionError::Browser)?;
        let user_agent = page.user_agent().await.map_err(SessionError::Browser)?;
        self.transition(SessionState::BrowserReady);

        let first_request_time = RequestTime::now();
        let (sink, rx) = ResponseSink::channel(Arc::clone(&self.accumulator));
        page.on_response(sink).await.map_err(SessionError::Browser)?;
        *consumer = Some(self.spawn_consumer(rx));

        self.transition(SessionState::Navigating);
        let mut controller = NavigationController::new(self.config.navigation.clone());
        if let Some((min, max)) = self.backoff {
            controller = controller.with_backoff(min, max);
        }
        let nav = controller
            .navigate(page.as_ref(), &self.config.url, &self.requests_sent, cancel)
            .await?;
        info!(
            attempts = nav.attempts,
            post_load_delay_ms = nav.post_load_delay.as_millis() as u64,
            "navigation complete"
        );

        self.transition(SessionState::AwaitingDrain);
        let completion = self
            .detector
            .wait(&self.accumulator, tokio::time::Instant::now(), cancel)
            .await;
        self.last_completion = Some(completion);
        let progress = match completion {
            Completion::Interrupted => return Err(SessionError::Interrupted),
            Completion::Complete(p) | Completion::TimedOut(p) => p,
        };
        info!(
            processed = progress.processed,
            observed = progress.observed,
            "processed {} out of {} responses",
            progress.processed,
            progress.observed
        );

        Ok(self.finalize(user_agent, first_request_time))
    }

    /// Single consumer: classifies responses one at a time in arrival order.
    fn spawn_consumer(&self, mut rx: mpsc::Receiver<Box<dyn ResponseHandle>>) -> JoinHandle<()> {
        let classifier = Classifier::new(Arc::clone(&self.policy), Arc::clone(&self.tally));
        let accumulator = Arc::clone(&self.accumulator);
        tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                classifier.process(response.as_ref(), &accumulator).await;
            }
        })
    }

    fn finalize(&self, user_agent: String, first_request_time: RequestTime) -> CaptureReport {
        let (responses, total_bytes_received) = self.accumulator.snapshot();
        let launch = &self.config.launch;
        CaptureReport {
            metadata: ReportMetadata {
                url: self.config.url.clone(),
                url_pattern: self.config.url_pattern.clone(),
                user_agent,
                screen_size: launch.screen_size.to_string(),
                debug_mode: launch.debug,
                proxy: launch.proxy.clone(),
                first_request_time,
                requests_sent: self.requests_sent(),
                total_bytes_received,
                error_summary: self.tally.summary(),
            },
            responses,
        }
    }
}
