//! Browser driver abstraction.
//!
//! Defines the `BrowserLauncher`, `BrowserDriver`, `PageDriver` and
//! `ResponseHandle` traits that abstract over the browser engine
//! (currently Chromium via chromiumoxide).

pub mod chromium;
pub mod network;

use crate::accumulator::CaptureAccumulator;
use crate::config::{LaunchOptions, WaitUntil};
use crate::error::DriverError;
use crate::types::ServerAddr;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Bodies are handed to the extractor in chunks of this size.
pub const BODY_CHUNK_SIZE: usize = 8192;

/// Buffer between the driver's event context and the classifier pipeline.
pub const RESPONSE_CHANNEL_CAPACITY: usize = 256;

/// Starts browser instances.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError>;
}

/// A running browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a new page (tab).
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, DriverError>;
    /// Shut the browser down.
    async fn close(&self) -> Result<(), DriverError>;
}

/// A single page whose network traffic is observed.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Start delivering every network response of this page to `sink`.
    async fn on_response(&self, sink: ResponseSink) -> Result<(), DriverError>;
    /// Navigate and wait for `wait_until`. A timeout must surface as `DriverError::Timeout`.
    async fn goto(&self, url: &str, timeout: Duration, wait_until: WaitUntil) -> Result<(), DriverError>;
    /// The user agent the page actually reports.
    async fn user_agent(&self) -> Result<String, DriverError>;
}

/// One network response observed by a page.
#[async_trait]
pub trait ResponseHandle: Send + Sync {
    fn url(&self) -> &str;
    fn status(&self) -> u16;
    fn status_text(&self) -> &str;
    /// Case-insensitive header lookup.
    fn header_value(&self, name: &str) -> Option<String>;
    fn headers(&self) -> BTreeMap<String, String>;
    fn server_addr(&self) -> Option<ServerAddr>;
    fn security_details(&self) -> Option<serde_json::Value>;

    /// Full response body. Implementations cache it; repeated calls return the same bytes.
    async fn body(&self) -> Result<Arc<Vec<u8>>, DriverError>;

    /// The body as a lazily-read stream of [`BODY_CHUNK_SIZE`] chunks.
    fn body_stream(&self) -> BoxStream<'_, Result<Vec<u8>, DriverError>> {
        Box::pin(async_stream::stream! {
            match self.body().await {
                Ok(body) => {
                    for chunk in body.chunks(BODY_CHUNK_SIZE) {
                        yield Ok(chunk.to_vec());
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    /// Length of the full body in bytes.
    async fn content_length(&self) -> Result<u64, DriverError> {
        Ok(self.body().await?.len() as u64)
    }
}

/// Sending half of the response channel, handed to [`PageDriver::on_response`].
///
/// Every delivery is counted as observed before it is queued, so the
/// completion detector can compare observed against processed.
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Box<dyn ResponseHandle>>,
    accumulator: Arc<CaptureAccumulator>,
}

impl ResponseSink {
    pub fn new(tx: mpsc::Sender<Box<dyn ResponseHandle>>, accumulator: Arc<CaptureAccumulator>) -> Self {
        Self { tx, accumulator }
    }

    /// Create a bounded response channel feeding `accumulator`'s counters.
    pub fn channel(accumulator: Arc<CaptureAccumulator>) -> (Self, mpsc::Receiver<Box<dyn ResponseHandle>>) {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        (Self::new(tx, accumulator), rx)
    }

    /// Count a response as observed ahead of its delivery.
    ///
    /// Each call must be followed by exactly one [`send`](Self::send) once the
    /// response is ready; until then the drain wait keeps waiting for it.
    pub fn observe(&self) {
        self.accumulator.mark_observed();
    }

    /// Queue a response already counted by [`observe`](Self::observe).
    pub async fn send(&self, response: Box<dyn ResponseHandle>) -> Result<(), DriverError> {
        self.tx.send(response).await.map_err(|_| {
            self.accumulator.unmark_observed();
            DriverError::Other("response consumer closed".to_string())
        })
    }

    /// Observe and queue a response in one step. Fails once the consumer is gone.
    pub async fn deliver(&self, response: Box<dyn ResponseHandle>) -> Result<(), DriverError> {
        self.observe();
        self.send(response).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
