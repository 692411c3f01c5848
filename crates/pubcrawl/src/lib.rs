// Copyright 2026 PubCrawl Contributors
// SPDX-License-Identifier: MIT

//! PubCrawl: load one URL in a headless browser and keep the network
//! responses whose URL matches a pattern.
//!
//! The pipeline, leaves first:
//!
//! - [`extract`] turns a response body into bounded, type-aware content.
//! - [`classify`] decides whether a response is captured and tallies failures.
//! - [`accumulator`] collects accepted records and running counters.
//! - [`navigation`] drives page load with bounded, jittered retries.
//! - [`completion`] decides when the response stream has gone quiet.
//! - [`session`] wires everything into one run and builds the report.
//!
//! The browser itself sits behind the traits in [`driver`]; the Chromium
//! implementation lives in [`driver::chromium`].

pub mod accumulator;
pub mod classify;
pub mod completion;
pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod navigation;
pub mod session;
pub mod types;

pub use config::{LaunchOptions, NavigationOptions, ScreenSize, SessionConfig, WaitUntil};
pub use error::{ConfigError, DriverError, ErrorKind, NavigationError, SessionError};
pub use session::{CaptureSession, SessionState};
pub use types::{CaptureReport, ErrorSummary, ExtractedContent, ReportMetadata, ResponseRecord};
