//! Chromium-based driver using chromiumoxide.

use super::network::{wait_for_network_idle, LoadOutcome, ResponseJoin, Settled};
use super::{BrowserDriver, BrowserLauncher, PageDriver, ResponseHandle, ResponseSink};
use crate::config::{LaunchOptions, WaitUntil};
use crate::error::DriverError;
use crate::types::ServerAddr;
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, RequestId, Response,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventDomContentEventFired, EventLoadEventFired, NavigateParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    // 1. PUBCRAWL_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("PUBCRAWL_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Explicit path from the command line
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.clone());
        }
    }

    // 3. ~/.pubcrawl/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".pubcrawl/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".pubcrawl/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".pubcrawl/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".pubcrawl/chromium/chrome-linux64/chrome"),
                home.join(".pubcrawl/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Browser command-line switches for `options`, beyond the binary path.
pub fn launch_args(options: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
    ];
    if !options.debug {
        args.push("--headless=new".to_string());
    } else {
        args.push("--auto-open-devtools-for-tabs".to_string());
    }
    if let Some(proxy) = &options.proxy {
        args.push(format!("--proxy-server={proxy}"));
    }
    if let Some(ua) = &options.user_agent {
        args.push(format!("--user-agent={ua}"));
    }
    args
}

fn cdp_error(err: chromiumoxide::error::CdpError) -> DriverError {
    DriverError::from_message(err.to_string())
}

/// Launches Chromium instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let chrome_path = find_chromium(options.chromium_path.as_ref()).ok_or_else(|| {
            DriverError::Other(
                "Chromium not found. Install Chrome/Chromium or set PUBCRAWL_CHROMIUM_PATH.".into(),
            )
        })?;

        let size = options.screen_size;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(size.width, size.height)
            .viewport(Viewport {
                width: size.width,
                height: size.height,
                ..Default::default()
            });
        if options.debug {
            builder = builder.with_head();
        }
        for arg in launch_args(options) {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| DriverError::Other(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Other(format!("failed to launch Chromium: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        Ok(Box::new(ChromiumBrowser {
            browser: tokio::sync::Mutex::new(browser),
            handler_task,
        }))
    }
}

/// A running Chromium instance.
pub struct ChromiumBrowser {
    browser: tokio::sync::Mutex<Browser>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserDriver for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, DriverError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(cdp_error)?;
        page.execute(EnableParams::default()).await.map_err(cdp_error)?;

        Ok(Box::new(ChromiumPage {
            page,
            inflight: Arc::new(AtomicUsize::new(0)),
            pump: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map(|_| ()).map_err(cdp_error);
        if let Err(e) = browser.wait().await {
            warn!("error waiting for browser process: {e}");
        }
        self.handler_task.abort();
        closed
    }
}

/// A single Chromium page whose responses are captured.
pub struct ChromiumPage {
    page: Page,
    /// Requests sent but neither finished nor failed.
    inflight: Arc<AtomicUsize>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        if let Some(task) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl ChromiumPage {
    async fn navigate(&self, url: &str, wait_until: WaitUntil) -> Result<(), DriverError> {
        let mut dom_ready = self
            .page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(cdp_error)?;
        let mut loaded = self
            .page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(cdp_error)?;

        let nav = self
            .page
            .execute(NavigateParams::new(url))
            .await
            .map_err(cdp_error)?;
        if let Some(error_text) = nav.result.error_text.as_deref() {
            return Err(DriverError::from_message(format!("navigation failed: {error_text}")));
        }

        match wait_until {
            WaitUntil::Commit => {}
            WaitUntil::DomContentLoaded => {
                dom_ready.next().await;
            }
            WaitUntil::Load => {
                loaded.next().await;
            }
            WaitUntil::NetworkIdle => {
                loaded.next().await;
                wait_for_network_idle(&self.inflight).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn on_response(&self, sink: ResponseSink) -> Result<(), DriverError> {
        let mut sent = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp_error)?;
        let mut received = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_error)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp_error)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp_error)?;

        let page = self.page.clone();
        let inflight = Arc::clone(&self.inflight);

        // Responses count as observed when their headers (or redirect) arrive
        // and are handed on once their load has ended.
        let task = tokio::spawn(async move {
            let mut join: ResponseJoin<RequestId, Response> = ResponseJoin::new();
            loop {
                let settled = tokio::select! {
                    biased;
                    Some(ev) = sent.next() => {
                        if ev.redirect_response.is_some() {
                            sink.observe();
                        }
                        join.request_sent(ev.request_id.clone(), ev.redirect_response.clone())
                    }
                    Some(ev) = received.next() => {
                        sink.observe();
                        join.response_received(ev.request_id.clone(), ev.response.clone())
                    }
                    Some(ev) = finished.next() => join.loading_finished(ev.request_id.clone()),
                    Some(ev) = failed.next() => {
                        join.loading_failed(ev.request_id.clone(), ev.error_text.clone())
                    }
                    else => break,
                };
                inflight.store(join.inflight(), Ordering::SeqCst);

                if let Some(settled) = settled {
                    let response = ChromiumResponse::new(page.clone(), settled);
                    if sink.send(Box::new(response)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let previous = self
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn goto(&self, url: &str, timeout: Duration, wait_until: WaitUntil) -> Result<(), DriverError> {
        match tokio::time::timeout(timeout, self.navigate(url, wait_until)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn user_agent(&self) -> Result<String, DriverError> {
        self.page
            .evaluate("navigator.userAgent")
            .await
            .map_err(cdp_error)?
            .into_value::<String>()
            .map_err(|e| DriverError::Other(format!("failed to read user agent: {e}")))
    }
}

/// One response observed on a Chromium page. The body is fetched on first use.
pub struct ChromiumResponse {
    page: Page,
    request_id: RequestId,
    response: Response,
    outcome: LoadOutcome,
    headers: BTreeMap<String, String>,
    body: OnceCell<Result<Arc<Vec<u8>>, DriverError>>,
}

impl ChromiumResponse {
    fn new(page: Page, settled: Settled<RequestId, Response>) -> Self {
        let headers = header_map(settled.response.headers.inner());
        Self {
            page,
            request_id: settled.id,
            response: settled.response,
            outcome: settled.outcome,
            headers,
            body: OnceCell::new(),
        }
    }

    async fn fetch_body(&self) -> Result<Arc<Vec<u8>>, DriverError> {
        if let Some(err) = unavailable_body(&self.outcome, &self.headers, &self.response.url) {
            return Err(err);
        }

        let returned = self
            .page
            .execute(GetResponseBodyParams::new(self.request_id.clone()))
            .await
            .map_err(cdp_error)?;
        let body = if returned.result.base64_encoded {
            base64::engine::general_purpose::STANDARD
                .decode(returned.result.body.as_bytes())
                .map_err(|e| DriverError::Other(format!("invalid base64 body: {e}")))?
        } else {
            returned.result.body.clone().into_bytes()
        };
        Ok(Arc::new(body))
    }
}

/// The error for a body that cannot be fetched, decided without asking the browser.
fn unavailable_body(
    outcome: &LoadOutcome,
    headers: &BTreeMap<String, String>,
    url: &str,
) -> Option<DriverError> {
    match outcome {
        LoadOutcome::Failed(reason) => Some(DriverError::ContentUnavailable(format!(
            "loading failed: {reason}"
        ))),
        LoadOutcome::Redirected => Some(DriverError::Other(format!(
            "redirect response has no body: {url}"
        ))),
        LoadOutcome::Finished if is_protection_challenge(headers) => Some(
            DriverError::ProtectionBlock(format!("challenge served for {url}")),
        ),
        LoadOutcome::Finished => None,
    }
}

/// Flatten the CDP headers object, lowercasing names.
fn header_map(value: &serde_json::Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.to_ascii_lowercase(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Edge networks mark interstitial challenges with `cf-mitigated: challenge`.
fn is_protection_challenge(headers: &BTreeMap<String, String>) -> bool {
    headers
        .get("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"))
}

#[async_trait]
impl ResponseHandle for ChromiumResponse {
    fn url(&self) -> &str {
        &self.response.url
    }

    fn status(&self) -> u16 {
        u16::try_from(self.response.status).unwrap_or(0)
    }

    fn status_text(&self) -> &str {
        &self.response.status_text
    }

    fn header_value(&self, name: &str) -> Option<String> {
        self.headers.get(&name.to_ascii_lowercase()).cloned()
    }

    fn headers(&self) -> BTreeMap<String, String> {
        self.headers.clone()
    }

    fn server_addr(&self) -> Option<ServerAddr> {
        let resp = &self.response;
        let ip = resp.remote_ip_address.clone()?;
        let port = resp.remote_port.and_then(|p| u16::try_from(p).ok())?;
        Some(ServerAddr { ip, port })
    }

    fn security_details(&self) -> Option<serde_json::Value> {
        self.response
            .security_details
            .as_ref()
            .and_then(|d| serde_json::to_value(d).ok())
    }

    async fn body(&self) -> Result<Arc<Vec<u8>>, DriverError> {
        self.body
            .get_or_init(|| self.fetch_body())
            .await
            .clone()
    }
}
