//! Error types for the capture pipeline.

use serde::{Deserialize, Serialize};

/// Message fragments the browser protocol uses when a body was evicted or never stored.
const MISSING_BODY_SIGNATURES: &[&str] = &[
    "no resource with given identifier",
    "no data found for resource",
    "missing content of resource",
    "body unavailable",
];

/// Message fragments that identify an edge-protection interstitial.
const PROTECTION_SIGNATURES: &[&str] = &["cloudflare", "blocked by edge protection", "cf-mitigated"];

/// Failure category recorded in the per-session error tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The response was replaced by an edge-protection challenge.
    CloudflareBlock,
    /// The browser no longer holds (or never held) the response body.
    ContentUnavailable,
    /// Anything else.
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CloudflareBlock => write!(f, "cloudflare-block"),
            Self::ContentUnavailable => write!(f, "content-unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Errors surfaced by a browser driver.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("navigation timed out after {0}ms")]
    Timeout(u64),

    #[error("body unavailable: {0}")]
    ContentUnavailable(String),

    #[error("blocked by edge protection: {0}")]
    ProtectionBlock(String),

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Classify a raw protocol error message.
    ///
    /// Only driver implementations should need this; everything downstream
    /// matches on the variant.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if PROTECTION_SIGNATURES.iter().any(|s| lower.contains(s)) {
            Self::ProtectionBlock(message)
        } else if MISSING_BODY_SIGNATURES.iter().any(|s| lower.contains(s)) {
            Self::ContentUnavailable(message)
        } else {
            Self::Other(message)
        }
    }

    /// The tally bucket this error counts towards.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ProtectionBlock(_) => ErrorKind::CloudflareBlock,
            Self::ContentUnavailable(_) => ErrorKind::ContentUnavailable,
            Self::Timeout(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Invalid session configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid URL pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid screen size '{0}' (expected WIDTHxHEIGHT, e.g. 1440x900)")]
    InvalidScreenSize(String),

    #[error("retries must be at least 1")]
    NoRetries,
}

/// Why navigation did not produce a loaded page.
#[derive(thiserror::Error, Debug)]
pub enum NavigationError {
    #[error("max retries reached after {attempts} attempt(s); unable to load the page")]
    RetriesExhausted { attempts: u32 },

    #[error("navigation failed: {0}")]
    Fatal(#[source] DriverError),

    #[error("navigation interrupted")]
    Interrupted,
}

/// Session-level failure. No report is produced.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to launch browser: {0}")]
    Launch(#[source] DriverError),

    #[error("browser error: {0}")]
    Browser(#[source] DriverError),

    #[error(transparent)]
    Navigation(NavigationError),

    #[error("session interrupted")]
    Interrupted,
}

impl From<NavigationError> for SessionError {
    fn from(err: NavigationError) -> Self {
        match err {
            NavigationError::Interrupted => Self::Interrupted,
            other => Self::Navigation(other),
        }
    }
}
