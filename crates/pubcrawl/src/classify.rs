//! Response classification: pattern and binary policy, extraction, and
//! failure tallying.

use crate::accumulator::{CaptureAccumulator, ErrorTally};
use crate::driver::ResponseHandle;
use crate::error::ErrorKind;
use crate::extract::{self, ContentFamily};
use crate::types::ResponseRecord;
use futures::FutureExt;
use regex::Regex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Capture policy for one session.
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    /// Tested with `is_match` against the full response URL.
    pub pattern: Regex,
    pub include_binary: bool,
    pub include_headers: bool,
    pub include_tls: bool,
    /// Maximum body bytes kept per response; 0 keeps everything.
    pub content_limit: usize,
}

/// Why a response was not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    PatternMismatch,
    BinaryExcluded,
}

/// Outcome of classifying one response.
#[derive(Debug, Clone)]
pub enum Verdict {
    Captured { record: ResponseRecord, bytes: u64 },
    Rejected(Rejection),
    Failed(ErrorKind),
}

/// Decides which responses are kept and builds their records.
#[derive(Clone)]
pub struct Classifier {
    policy: Arc<CapturePolicy>,
    tally: Arc<ErrorTally>,
}

impl Classifier {
    pub fn new(policy: Arc<CapturePolicy>, tally: Arc<ErrorTally>) -> Self {
        Self { policy, tally }
    }

    /// Check the policy without touching the body. `None` means eligible.
    pub fn screen(&self, response: &dyn ResponseHandle) -> Option<Rejection> {
        if !self.policy.pattern.is_match(response.url()) {
            return Some(Rejection::PatternMismatch);
        }
        let content_type = response.header_value("content-type").unwrap_or_default();
        if ContentFamily::of(&content_type).is_binary() && !self.policy.include_binary {
            return Some(Rejection::BinaryExcluded);
        }
        None
    }

    /// Classify `response`, extracting its content when eligible.
    ///
    /// Failures are counted in the tally and reported as [`Verdict::Failed`];
    /// they never escape as errors.
    pub async fn classify(&self, response: &dyn ResponseHandle) -> Verdict {
        if let Some(rejection) = self.screen(response) {
            return Verdict::Rejected(rejection);
        }

        match self.build_record(response).await {
            Ok((record, bytes)) => Verdict::Captured { record, bytes },
            Err(err) => {
                let kind = err.kind();
                match kind {
                    ErrorKind::CloudflareBlock => {
                        warn!(url = response.url(), "edge protection detected")
                    }
                    ErrorKind::ContentUnavailable => warn!(
                        url = response.url(),
                        "unable to access response body; content may be dynamic or protected"
                    ),
                    ErrorKind::Other => {
                        error!(url = response.url(), "error processing response: {err}")
                    }
                }
                self.tally.record(kind);
                Verdict::Failed(kind)
            }
        }
    }

    async fn build_record(
        &self,
        response: &dyn ResponseHandle,
    ) -> Result<(ResponseRecord, u64), crate::error::DriverError> {
        let content_type = response.header_value("content-type");
        let extraction = extract::extract(
            response,
            content_type.as_deref().unwrap_or_default(),
            self.policy.content_limit,
        )
        .await?;
        let content_length = response.content_length().await?;
        let server = response.server_addr();

        let record = ResponseRecord {
            matched_url: response.url().to_string(),
            content_type,
            content_length,
            content: extraction.content,
            status: response.status(),
            status_text: response.status_text().to_string(),
            server_ip: server.as_ref().map(|s| s.ip.clone()),
            server_port: server.as_ref().map(|s| s.port),
            headers: self.policy.include_headers.then(|| response.headers()),
            security_details: if self.policy.include_tls {
                response.security_details()
            } else {
                None
            },
        };
        Ok((record, extraction.bytes_read))
    }

    /// Classify `response` and hand a captured record to `accumulator`.
    ///
    /// Always marks the response processed, including when classification
    /// panics; a panic counts as [`ErrorKind::Other`].
    pub async fn process(&self, response: &dyn ResponseHandle, accumulator: &CaptureAccumulator) {
        let verdict = AssertUnwindSafe(self.classify(response))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(url = response.url(), "response handler panicked");
                self.tally.record(ErrorKind::Other);
                Verdict::Failed(ErrorKind::Other)
            });

        match verdict {
            Verdict::Captured { record, bytes } => {
                debug!(url = %record.matched_url, bytes, "captured response");
                accumulator.offer(record, bytes);
            }
            Verdict::Rejected(reason) => {
                debug!(url = response.url(), ?reason, "skipped response");
            }
            Verdict::Failed(_) => {}
        }
        accumulator.mark_processed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeResponse;
    use crate::error::DriverError;
    use crate::types::{ExtractedContent, ServerAddr};
    use serde_json::json;

    fn classifier(pattern: &str, include_binary: bool) -> (Classifier, Arc<ErrorTally>) {
        let policy = CapturePolicy {
            pattern: Regex::new(pattern).unwrap(),
            include_binary,
            include_headers: false,
            include_tls: false,
            content_limit: 256,
        };
        let tally = Arc::new(ErrorTally::new());
        (Classifier::new(Arc::new(policy), Arc::clone(&tally)), tally)
    }

    #[tokio::test]
    async fn test_pattern_mismatch_rejected_without_reading_body() {
        let (c, tally) = classifier(r"api/v1", false);
        let resp = FakeResponse::new("https://example.com/static/app.js", "application/javascript", "x");
        assert!(matches!(
            c.classify(&resp).await,
            Verdict::Rejected(Rejection::PatternMismatch)
        ));
        assert_eq!(resp.body_reads.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(tally.summary().total(), 0);
    }

    #[tokio::test]
    async fn test_binary_policy() {
        let (c, _) = classifier(".*", false);
        let resp = FakeResponse::new("https://example.com/logo.png", "image/png", vec![1, 2, 3]);
        assert!(matches!(
            c.classify(&resp).await,
            Verdict::Rejected(Rejection::BinaryExcluded)
        ));

        let (c, _) = classifier(".*", true);
        match c.classify(&resp).await {
            Verdict::Captured { record, bytes } => {
                assert_eq!(record.content, ExtractedContent::Hex("010203".into()));
                assert_eq!(bytes, 3);
            }
            other => panic!("expected capture, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_content_type_is_binary() {
        let (c, _) = classifier(".*", false);
        let mut resp = FakeResponse::new("https://example.com/blob", "", "x");
        resp.headers.clear();
        assert!(matches!(
            c.classify(&resp).await,
            Verdict::Rejected(Rejection::BinaryExcluded)
        ));
    }

    #[tokio::test]
    async fn test_captured_record_fields() {
        let (c, _) = classifier(r"users/\d+", false);
        let resp = FakeResponse::new(
            "https://api.example.com/users/42",
            "application/json",
            r#"{"id":42}"#,
        );
        let Verdict::Captured { record, bytes } = c.classify(&resp).await else {
            panic!("expected capture");
        };
        assert_eq!(record.matched_url, "https://api.example.com/users/42");
        assert_eq!(record.content_type.as_deref(), Some("application/json"));
        assert_eq!(record.content, ExtractedContent::Structured(json!({"id": 42})));
        assert_eq!(record.content_length, 9);
        assert_eq!(record.status, 200);
        assert_eq!(record.server_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(record.server_port, Some(443));
        assert!(record.headers.is_none());
        assert!(record.security_details.is_none());
        assert_eq!(bytes, 9);
    }

    #[tokio::test]
    async fn test_headers_and_tls_included_on_request() {
        let policy = CapturePolicy {
            pattern: Regex::new(".*").unwrap(),
            include_binary: false,
            include_headers: true,
            include_tls: true,
            content_limit: 0,
        };
        let c = Classifier::new(Arc::new(policy), Arc::new(ErrorTally::new()));
        let mut resp = FakeResponse::new("https://example.com/", "text/html", "<p>hi</p>");
        resp.security = Some(json!({"protocol": "TLS 1.3"}));
        resp.server = Some(ServerAddr {
            ip: "10.0.0.1".into(),
            port: 8443,
        });

        let Verdict::Captured { record, .. } = c.classify(&resp).await else {
            panic!("expected capture");
        };
        assert_eq!(
            record.headers.unwrap().get("content-type").map(String::as_str),
            Some("text/html")
        );
        assert_eq!(record.security_details, Some(json!({"protocol": "TLS 1.3"})));
        assert_eq!(record.server_port, Some(8443));
    }

    #[tokio::test]
    async fn test_failures_tallied_by_kind() {
        let (c, tally) = classifier(".*", false);
        let cases = [
            DriverError::ContentUnavailable("No resource with given identifier found".into()),
            DriverError::ProtectionBlock("challenge".into()),
            DriverError::Other("target closed".into()),
        ];
        for err in cases {
            let resp = FakeResponse::failing("https://example.com/", "text/html", err);
            assert!(matches!(c.classify(&resp).await, Verdict::Failed(_)));
        }
        let summary = tally.summary();
        assert_eq!(summary.missing_content, 1);
        assert_eq!(summary.cloudflare_protection, 1);
        assert_eq!(summary.other_errors, 1);
    }

    #[tokio::test]
    async fn test_missing_body_increments_only_missing_content() {
        let (c, tally) = classifier(".*", false);
        let acc = CaptureAccumulator::new();
        acc.mark_observed();
        let resp = FakeResponse::failing(
            "https://example.com/api",
            "application/json",
            DriverError::ContentUnavailable("evicted".into()),
        );
        c.process(&resp, &acc).await;

        assert!(acc.is_empty());
        assert_eq!(acc.total_bytes(), 0);
        assert!(acc.progress().is_drained());
        let summary = tally.summary();
        assert_eq!(summary.missing_content, 1);
        assert_eq!(summary.cloudflare_protection + summary.other_errors, 0);
    }

    #[tokio::test]
    async fn test_classification_is_idempotent() {
        let (c, _) = classifier(".*", false);
        let resp = FakeResponse::new("https://example.com/", "text/html", vec![b'q'; 1000]);
        let (Verdict::Captured { record: a, bytes: ba }, Verdict::Captured { record: b, bytes: bb }) =
            (c.classify(&resp).await, c.classify(&resp).await)
        else {
            panic!("expected two captures");
        };
        assert_eq!(a.content, b.content);
        assert_eq!(ba, bb);
    }

    struct PanickingResponse;

    #[async_trait::async_trait]
    impl ResponseHandle for PanickingResponse {
        fn url(&self) -> &str {
            "https://example.com/boom"
        }
        fn status(&self) -> u16 {
            200
        }
        fn status_text(&self) -> &str {
            "OK"
        }
        fn header_value(&self, _name: &str) -> Option<String> {
            Some("text/plain".to_string())
        }
        fn headers(&self) -> std::collections::BTreeMap<String, String> {
            Default::default()
        }
        fn server_addr(&self) -> Option<ServerAddr> {
            None
        }
        fn security_details(&self) -> Option<serde_json::Value> {
            None
        }
        async fn body(&self) -> Result<Arc<Vec<u8>>, DriverError> {
            panic!("driver bug");
        }
    }

    #[tokio::test]
    async fn test_panic_counts_as_other() {
        let (c, tally) = classifier(".*", false);
        let acc = CaptureAccumulator::new();
        acc.mark_observed();
        c.process(&PanickingResponse, &acc).await;
        assert_eq!(tally.summary().other_errors, 1);
        assert!(acc.is_empty());
        assert!(acc.progress().is_drained());
    }
}
