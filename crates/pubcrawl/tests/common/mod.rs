//! In-memory browser used by the session integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pubcrawl::config::{LaunchOptions, WaitUntil};
use pubcrawl::driver::{BrowserDriver, BrowserLauncher, PageDriver, ResponseHandle, ResponseSink};
use pubcrawl::types::ServerAddr;
use pubcrawl::DriverError;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted response.
#[derive(Clone)]
pub struct FakeResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Result<Arc<Vec<u8>>, DriverError>,
    /// Body reads never complete.
    pub hang: bool,
}

impl FakeResponse {
    pub fn ok(url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.to_string(),
            content_type: Some(content_type.to_string()),
            body: Ok(Arc::new(body.into())),
            hang: false,
        }
    }

    pub fn failing(url: &str, content_type: &str, err: DriverError) -> Self {
        Self {
            body: Err(err),
            ..Self::ok(url, content_type, Vec::new())
        }
    }

    pub fn hanging(url: &str, content_type: &str) -> Self {
        Self {
            hang: true,
            ..Self::ok(url, content_type, Vec::new())
        }
    }
}

#[async_trait]
impl ResponseHandle for FakeResponse {
    fn url(&self) -> &str {
        &self.url
    }
    fn status(&self) -> u16 {
        200
    }
    fn status_text(&self) -> &str {
        "OK"
    }
    fn header_value(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type.clone()
        } else {
            None
        }
    }
    fn headers(&self) -> BTreeMap<String, String> {
        self.content_type
            .iter()
            .map(|ct| ("content-type".to_string(), ct.clone()))
            .collect()
    }
    fn server_addr(&self) -> Option<ServerAddr> {
        Some(ServerAddr {
            ip: "203.0.113.7".to_string(),
            port: 443,
        })
    }
    fn security_details(&self) -> Option<serde_json::Value> {
        None
    }
    async fn body(&self) -> Result<Arc<Vec<u8>>, DriverError> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        self.body.clone()
    }
}

/// What a fake navigation attempt does.
#[derive(Clone)]
pub enum NavStep {
    /// Succeed and emit the page's responses.
    Load,
    /// Wait out the timeout and fail with `Timeout`.
    TimeOut,
    Fail(DriverError),
}

/// Shared observations for assertions after the run.
#[derive(Default)]
pub struct Probe {
    pub goto_calls: AtomicU64,
    pub closed: AtomicBool,
    pub launched: AtomicBool,
}

pub struct FakeLauncher {
    pub responses: Vec<FakeResponse>,
    pub steps: Vec<NavStep>,
    pub launch_error: Option<DriverError>,
    pub close_error: Option<DriverError>,
    /// `new_page` never returns.
    pub stall_new_page: bool,
    pub probe: Arc<Probe>,
}

impl FakeLauncher {
    pub fn new(responses: Vec<FakeResponse>, steps: Vec<NavStep>) -> Self {
        Self {
            responses,
            steps,
            launch_error: None,
            close_error: None,
            stall_new_page: false,
            probe: Arc::new(Probe::default()),
        }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError> {
        if let Some(err) = &self.launch_error {
            return Err(err.clone());
        }
        self.probe.launched.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeBrowser {
            responses: self.responses.clone(),
            steps: self.steps.clone(),
            close_error: self.close_error.clone(),
            stall_new_page: self.stall_new_page,
            probe: Arc::clone(&self.probe),
        }))
    }
}

struct FakeBrowser {
    responses: Vec<FakeResponse>,
    steps: Vec<NavStep>,
    close_error: Option<DriverError>,
    stall_new_page: bool,
    probe: Arc<Probe>,
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        if self.stall_new_page {
            futures::future::pending::<()>().await;
        }
        Ok(Box::new(FakePage {
            responses: self.responses.clone(),
            steps: Mutex::new(self.steps.clone().into()),
            sink: Mutex::new(None),
            probe: Arc::clone(&self.probe),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.probe.closed.store(true, Ordering::SeqCst);
        match &self.close_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

struct FakePage {
    responses: Vec<FakeResponse>,
    steps: Mutex<VecDeque<NavStep>>,
    sink: Mutex<Option<ResponseSink>>,
    probe: Arc<Probe>,
}

#[async_trait]
impl PageDriver for FakePage {
    async fn on_response(&self, sink: ResponseSink) -> Result<(), DriverError> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    async fn goto(&self, _url: &str, timeout: Duration, _wait: WaitUntil) -> Result<(), DriverError> {
        self.probe.goto_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(NavStep::TimeOut);
        match step {
            NavStep::Load => {
                let sink = self.sink.lock().unwrap().clone();
                if let Some(sink) = sink {
                    for response in &self.responses {
                        sink.deliver(Box::new(response.clone())).await?;
                    }
                }
                Ok(())
            }
            NavStep::TimeOut => {
                tokio::time::sleep(timeout).await;
                Err(DriverError::Timeout(timeout.as_millis() as u64))
            }
            NavStep::Fail(err) => Err(err),
        }
    }

    async fn user_agent(&self) -> Result<String, DriverError> {
        Ok("Mozilla/5.0 (FakeBrowser)".to_string())
    }
}
