//! Response body extraction.
//!
//! Bodies are read chunk by chunk up to the content limit, then rendered
//! according to their content-type family: structured (JSON) bodies are
//! parsed, textual bodies decoded as lossy UTF-8, everything else hex-encoded.

use crate::driver::ResponseHandle;
use crate::error::DriverError;
use crate::types::ExtractedContent;
use futures::{Stream, StreamExt};

/// Appended to a body cut at the content limit.
pub const TRUNCATION_MARKER: &[u8] = b"...";

/// Content-type fragments that mark a body as textual.
const TEXTUAL_MARKERS: &[&str] = &[
    "text", "javascript", "css", "html", "xml", "plain", "xhtml", "svg",
];

/// Content-type fragments that mark a body as structured data.
const STRUCTURED_MARKERS: &[&str] = &["json"];

/// Broad content-type family, decided from the `content-type` header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFamily {
    Structured,
    Text,
    Binary,
}

impl ContentFamily {
    pub fn of(content_type: &str) -> Self {
        let ct = content_type.to_ascii_lowercase();
        if STRUCTURED_MARKERS.iter().any(|m| ct.contains(m)) {
            Self::Structured
        } else if TEXTUAL_MARKERS.iter().any(|m| ct.contains(m)) {
            Self::Text
        } else {
            Self::Binary
        }
    }

    pub fn is_binary(self) -> bool {
        self == Self::Binary
    }
}

/// Result of reading and rendering one body.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub content: ExtractedContent,
    /// Body bytes actually kept, marker excluded. This is what gets metered.
    pub bytes_read: u64,
    pub truncated: bool,
}

/// Read up to `limit` bytes from `chunks`; `limit == 0` reads everything.
///
/// Stops pulling chunks as soon as the limit is reached and reports the
/// result as truncated.
pub async fn read_limited<S>(mut chunks: S, limit: usize) -> Result<(Vec<u8>, bool), DriverError>
where
    S: Stream<Item = Result<Vec<u8>, DriverError>> + Unpin,
{
    let mut buf = Vec::new();
    while let Some(chunk) = chunks.next().await {
        buf.extend_from_slice(&chunk?);
        if limit > 0 && buf.len() >= limit {
            buf.truncate(limit);
            return Ok((buf, true));
        }
    }
    Ok((buf, false))
}

/// Render raw bytes according to the content-type family.
///
/// A structured body that fails to parse degrades to text.
pub fn render(content_type: &str, bytes: &[u8]) -> ExtractedContent {
    match ContentFamily::of(content_type) {
        ContentFamily::Structured => match serde_json::from_slice(bytes) {
            Ok(value) => ExtractedContent::Structured(value),
            Err(_) => ExtractedContent::Text(String::from_utf8_lossy(bytes).into_owned()),
        },
        ContentFamily::Text => ExtractedContent::Text(String::from_utf8_lossy(bytes).into_owned()),
        ContentFamily::Binary => ExtractedContent::Hex(hex::encode(bytes)),
    }
}

/// Read and render the body of `response`.
pub async fn extract(
    response: &dyn ResponseHandle,
    content_type: &str,
    content_limit: usize,
) -> Result<Extraction, DriverError> {
    let (mut bytes, truncated) = read_limited(response.body_stream(), content_limit).await?;
    let bytes_read = bytes.len() as u64;
    if truncated {
        bytes.extend_from_slice(TRUNCATION_MARKER);
    }
    Ok(Extraction {
        content: render(content_type, &bytes),
        bytes_read,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeResponse;
    use serde_json::json;

    #[test]
    fn test_content_family() {
        assert_eq!(ContentFamily::of("application/json; charset=utf-8"), ContentFamily::Structured);
        assert_eq!(ContentFamily::of("application/ld+json"), ContentFamily::Structured);
        assert_eq!(ContentFamily::of("text/html"), ContentFamily::Text);
        assert_eq!(ContentFamily::of("application/javascript"), ContentFamily::Text);
        assert_eq!(ContentFamily::of("image/svg+xml"), ContentFamily::Text);
        assert_eq!(ContentFamily::of("TEXT/CSS"), ContentFamily::Text);
        assert_eq!(ContentFamily::of("image/png"), ContentFamily::Binary);
        assert_eq!(ContentFamily::of("font/woff2"), ContentFamily::Binary);
        assert_eq!(ContentFamily::of(""), ContentFamily::Binary);
    }

    #[tokio::test]
    async fn test_truncates_at_limit_with_marker() {
        let body = vec![b'a'; 5000];
        let resp = FakeResponse::new("https://a.test/", "text/html", body);
        let out = extract(&resp, "text/html", 256).await.unwrap();

        assert!(out.truncated);
        assert_eq!(out.bytes_read, 256);
        let text = out.content.as_str().unwrap();
        assert_eq!(text.len(), 256 + TRUNCATION_MARKER.len());
        assert!(text.ends_with("..."));
        assert!(text[..256].bytes().all(|b| b == b'a'));
    }

    #[tokio::test]
    async fn test_truncation_spans_chunks() {
        let body = vec![b'z'; 20_000];
        let resp = FakeResponse::new("https://a.test/", "text/plain", body);
        let out = extract(&resp, "text/plain", 10_000).await.unwrap();
        assert_eq!(out.bytes_read, 10_000);
        assert_eq!(out.content.as_str().unwrap().len(), 10_003);
    }

    #[tokio::test]
    async fn test_zero_limit_reads_everything() {
        let body: Vec<u8> = (0..20_000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let resp = FakeResponse::new("https://a.test/", "text/plain", body.clone());
        let out = extract(&resp, "text/plain", 0).await.unwrap();

        assert!(!out.truncated);
        assert_eq!(out.bytes_read, 20_000);
        assert_eq!(out.content.as_str().unwrap().as_bytes(), body.as_slice());
    }

    #[tokio::test]
    async fn test_short_body_untouched() {
        let resp = FakeResponse::new("https://a.test/", "text/plain", "hello");
        let out = extract(&resp, "text/plain", 256).await.unwrap();
        assert!(!out.truncated);
        assert_eq!(out.content, ExtractedContent::Text("hello".into()));
        assert_eq!(out.bytes_read, 5);
    }

    #[tokio::test]
    async fn test_body_exactly_at_limit_is_truncated() {
        let resp = FakeResponse::new("https://a.test/", "text/plain", vec![b'x'; 256]);
        let out = extract(&resp, "text/plain", 256).await.unwrap();
        assert!(out.truncated);
        assert_eq!(out.bytes_read, 256);
        let text = out.content.as_str().unwrap();
        assert_eq!(text.len(), 256 + TRUNCATION_MARKER.len());
        assert!(text.ends_with("..."));
    }

    #[tokio::test]
    async fn test_json_parsed() {
        let resp = FakeResponse::new("https://a.test/api", "application/json", r#"{"items":[1,2]}"#);
        let out = extract(&resp, "application/json", 0).await.unwrap();
        assert_eq!(out.content, ExtractedContent::Structured(json!({"items": [1, 2]})));
    }

    #[tokio::test]
    async fn test_truncated_json_degrades_to_text() {
        let resp = FakeResponse::new("https://a.test/api", "application/json", r#"{"items":[1,2,3,4]}"#);
        let out = extract(&resp, "application/json", 8).await.unwrap();
        assert_eq!(out.content, ExtractedContent::Text(r#"{"items"..."#.into()));
    }

    #[tokio::test]
    async fn test_binary_hex_encoded() {
        let resp = FakeResponse::new("https://a.test/i.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        let out = extract(&resp, "image/png", 2).await.unwrap();
        // Marker bytes are hex-encoded along with the body.
        assert_eq!(out.content, ExtractedContent::Hex("89502e2e2e".into()));
        assert_eq!(out.bytes_read, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_lossy() {
        let resp = FakeResponse::new("https://a.test/", "text/plain", vec![b'o', b'k', 0xff]);
        let out = extract(&resp, "text/plain", 0).await.unwrap();
        assert_eq!(out.content, ExtractedContent::Text("ok\u{fffd}".into()));
    }

    #[tokio::test]
    async fn test_body_error_propagates() {
        let resp = FakeResponse::failing(
            "https://a.test/",
            "text/plain",
            DriverError::ContentUnavailable("evicted".into()),
        );
        let err = extract(&resp, "text/plain", 256).await.unwrap_err();
        assert!(matches!(err, DriverError::ContentUnavailable(_)));
    }
}
