//! Session configuration.
//!
//! Values arrive from the command line already typed; [`SessionConfig::validate`]
//! is the single place that rejects malformed input before a browser is started.

use crate::classify::CapturePolicy;
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_CONTENT_LIMIT: usize = 256;
pub const DEFAULT_SCREEN_SIZE: ScreenSize = ScreenSize {
    width: 1440,
    height: 900,
};

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        DEFAULT_SCREEN_SIZE
    }
}

impl FromStr for ScreenSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidScreenSize(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl std::fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Page lifecycle stage a navigation waits for. Ordered earliest to latest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Commit,
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl Default for WaitUntil {
    fn default() -> Self {
        Self::NetworkIdle
    }
}

impl FromStr for WaitUntil {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commit" => Ok(Self::Commit),
            "domcontentloaded" => Ok(Self::DomContentLoaded),
            "load" => Ok(Self::Load),
            "networkidle" => Ok(Self::NetworkIdle),
            other => Err(format!("unknown wait condition: {other}")),
        }
    }
}

impl std::fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::DomContentLoaded => write!(f, "domcontentloaded"),
            Self::Load => write!(f, "load"),
            Self::NetworkIdle => write!(f, "networkidle"),
        }
    }
}

impl WaitUntil {
    /// Parse a comma-separated list such as `"load,networkidle"`.
    ///
    /// Unknown entries are dropped with a warning. An empty result falls back
    /// to `networkidle`; several valid entries resolve to the latest stage.
    pub fn parse_list(list: &str) -> Self {
        let mut chosen: Option<Self> = None;
        for option in list.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option.parse::<Self>() {
                Ok(w) => chosen = Some(chosen.map_or(w, |c| c.max(w))),
                Err(e) => warn!("ignoring {e}"),
            }
        }
        chosen.unwrap_or_else(|| {
            warn!("no valid wait-until options provided, using default '{}'", Self::default());
            Self::default()
        })
    }
}

/// How the browser is started.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Override for the browser's user agent; `None` keeps the bundled default.
    pub user_agent: Option<String>,
    pub screen_size: ScreenSize,
    /// Proxy server, e.g. `socks5://127.0.0.1:9150`.
    pub proxy: Option<String>,
    /// Headful browser with devtools open.
    pub debug: bool,
    /// Explicit browser binary; discovered automatically when `None`.
    pub chromium_path: Option<PathBuf>,
}

/// Parameters for the navigation controller.
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    /// Per-attempt navigation timeout.
    pub timeout: Duration,
    /// Maximum number of attempts (not additional retries).
    pub max_retries: u32,
    pub wait_until: WaitUntil,
    /// Fixed pause after a successful load; random in 0.7–1.3 s when `None`.
    pub post_load_delay: Option<Duration>,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_retries: DEFAULT_RETRIES,
            wait_until: WaitUntil::default(),
            post_load_delay: None,
        }
    }
}

/// Everything one capture session needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: String,
    pub url_pattern: String,
    pub navigation: NavigationOptions,
    /// Maximum body bytes kept per response; 0 keeps everything.
    pub content_limit: usize,
    pub include_binary: bool,
    pub include_headers: bool,
    pub include_tls: bool,
    pub launch: LaunchOptions,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, url_pattern: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            url_pattern: url_pattern.into(),
            navigation: NavigationOptions::default(),
            content_limit: DEFAULT_CONTENT_LIMIT,
            include_binary: false,
            include_headers: false,
            include_tls: false,
            launch: LaunchOptions::default(),
        }
    }

    /// Check the entry URL and retry count, and compile the match pattern.
    pub fn validate(&self) -> Result<CapturePolicy, ConfigError> {
        url::Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        if self.navigation.max_retries == 0 {
            return Err(ConfigError::NoRetries);
        }
        let pattern = Regex::new(&self.url_pattern).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: self.url_pattern.clone(),
                source,
            }
        })?;
        Ok(CapturePolicy {
            pattern,
            include_binary: self.include_binary,
            include_headers: self.include_headers,
            include_tls: self.include_tls,
            content_limit: self.content_limit,
        })
    }
}
