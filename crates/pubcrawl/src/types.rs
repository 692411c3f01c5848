//! Report data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body content as it appears in the report.
///
/// Serialized untagged: structured bodies appear as JSON values, text as a
/// string, binary as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedContent {
    Structured(serde_json::Value),
    Text(String),
    Hex(String),
}

impl ExtractedContent {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Hex(s) => Some(s),
            Self::Structured(_) => None,
        }
    }
}

/// Remote endpoint that served a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddr {
    pub ip: String,
    pub port: u16,
}

/// One captured response. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub matched_url: String,
    pub content_type: Option<String>,
    /// Full body length as reported by the browser, regardless of truncation.
    pub content_length: u64,
    pub content: ExtractedContent,
    pub status: u16,
    pub status_text: String,
    pub server_ip: Option<String>,
    pub server_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_details: Option<serde_json::Value>,
}

/// Per-kind failure counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub cloudflare_protection: u64,
    pub missing_content: u64,
    pub other_errors: u64,
}

impl ErrorSummary {
    pub fn total(&self) -> u64 {
        self.cloudflare_protection + self.missing_content + self.other_errors
    }
}

/// Wall-clock time the session started navigating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTime {
    /// Seconds since the Unix epoch, fractional.
    pub unix: f64,
    pub iso: String,
}

impl RequestTime {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            unix: now.timestamp_micros() as f64 / 1_000_000.0,
            iso: now.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub url: String,
    pub url_pattern: String,
    pub user_agent: String,
    pub screen_size: String,
    pub debug_mode: bool,
    pub proxy: Option<String>,
    pub first_request_time: RequestTime,
    pub requests_sent: u64,
    pub total_bytes_received: u64,
    pub error_summary: ErrorSummary,
}

/// Final artifact of a session: metadata plus captured responses in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    pub metadata: ReportMetadata,
    pub responses: Vec<ResponseRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(content: ExtractedContent) -> ResponseRecord {
        ResponseRecord {
            matched_url: "https://example.com/api/v1/items".to_string(),
            content_type: Some("application/json".to_string()),
            content_length: 13,
            content,
            status: 200,
            status_text: "OK".to_string(),
            server_ip: Some("93.184.216.34".to_string()),
            server_port: Some(443),
            headers: None,
            security_details: None,
        }
    }

    #[test]
    fn test_content_serializes_untagged() {
        let value = serde_json::to_value(ExtractedContent::Structured(json!({"a": 1}))).unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = serde_json::to_value(ExtractedContent::Text("hi".into())).unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let value = serde_json::to_value(record(ExtractedContent::Text("x".into()))).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("headers"));
        assert!(!obj.contains_key("security_details"));
        assert_eq!(obj["server_port"], json!(443));
    }

    #[test]
    fn test_headers_present_when_set() {
        let mut rec = record(ExtractedContent::Text("x".into()));
        rec.headers = Some(BTreeMap::from([(
            "content-type".to_string(),
            "application/json".to_string(),
        )]));
        let value = serde_json::to_value(rec).unwrap();
        assert_eq!(value["headers"]["content-type"], json!("application/json"));
    }

    #[test]
    fn test_error_summary_total() {
        let summary = ErrorSummary {
            cloudflare_protection: 1,
            missing_content: 2,
            other_errors: 3,
        };
        assert_eq!(summary.total(), 6);
    }

    #[test]
    fn test_request_time_iso_matches_unix() {
        let t = RequestTime::now();
        let parsed = chrono::DateTime::parse_from_rfc3339(&t.iso).unwrap();
        assert!((parsed.timestamp() as f64 - t.unix).abs() < 1.0);
    }
}
