//! Plain-text extraction from PDF attachments and HTML message bodies.
//!
//! Extraction never fails outward. A document no extractor can read yields
//! an empty string, and the reconciler then falls back to the message body.

use std::panic::{self, AssertUnwindSafe};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::channels::MessageContent;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}"))
}

static SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)>"));
static LINE_BREAK_TAGS: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6]|table)>"));
static CELL_END: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)</t[dh]>"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<[^>]*>"));

/// Extract text from PDF bytes.
///
/// Tries `pdf-extract` first, then `lopdf` page-by-page extraction. Returns an
/// empty string when both fail or produce only whitespace.
pub fn extract_text(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    match primary_extract(bytes) {
        Ok(text) if !text.trim().is_empty() => return text,
        Ok(_) => debug!("Primary PDF extractor returned no text, trying fallback"),
        Err(e) => debug!(error = %e, "Primary PDF extractor failed, trying fallback"),
    }

    match fallback_extract(bytes) {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            debug!("Fallback PDF extractor returned no text");
            String::new()
        }
        Err(e) => {
            warn!(error = %e, "Could not extract text from PDF");
            String::new()
        }
    }
}

fn primary_extract(bytes: &[u8]) -> Result<String, String> {
    // pdf-extract panics on some malformed fonts and encodings.
    panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
        .map_err(|_| "pdf-extract panicked".to_string())?
        .map_err(|e| format!("pdf-extract: {e}"))
}

fn fallback_extract(bytes: &[u8]) -> Result<String, String> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| format!("load pdf: {e}"))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Ok(String::new());
    }

    let mut combined = String::new();
    for page in pages {
        match document.extract_text(&[page]) {
            Ok(text) => {
                combined.push_str(&text);
                combined.push('\n');
            }
            Err(e) => debug!(page, error = %e, "Skipping unreadable PDF page"),
        }
    }
    Ok(combined)
}

/// Reduce an HTML body to text, keeping block boundaries as newlines.
///
/// Bodies without any tag are returned unchanged.
pub fn strip_html(body: &str) -> String {
    if !body.contains('<') {
        return body.to_string();
    }
    let text = SCRIPT_STYLE.replace_all(body, "");
    let text = LINE_BREAK_TAGS.replace_all(&text, "\n");
    let text = CELL_END.replace_all(&text, " ");
    let text = ANY_TAG.replace_all(&text, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// The text a booking should be parsed from.
///
/// The first PDF attachment wins when it yields any text; otherwise the
/// (HTML-stripped) message body is used.
pub fn extract_message_text(content: &MessageContent) -> String {
    if let Some(pdf) = content.first_pdf() {
        let text = extract_text(&pdf.bytes);
        if !text.trim().is_empty() {
            return text;
        }
        debug!(filename = %pdf.filename, "PDF had no extractable text, using message body");
    }
    strip_html(&content.body)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::channels::Attachment;

    #[test]
    fn garbage_pdf_yields_empty_text() {
        assert_eq!(extract_text(b"definitely not a pdf"), "");
        assert_eq!(extract_text(b""), "");
    }

    #[test]
    fn unreadable_pdf_falls_back_to_body() {
        let content = MessageContent {
            body: "Customer: Jane Roe".into(),
            attachments: vec![Attachment {
                filename: "booking.pdf".into(),
                content_type: "application/pdf".into(),
                bytes: b"%PDF-broken".to_vec(),
            }],
        };
        assert_eq!(extract_message_text(&content), "Customer: Jane Roe");
    }

    #[test]
    fn html_body_without_attachments_is_stripped() {
        let content = MessageContent {
            body: "<p>Customer: Jane Roe</p>".into(),
            attachments: Vec::new(),
        };
        assert_eq!(extract_message_text(&content), "Customer: Jane Roe\n");
    }

    #[test]
    fn html_keeps_line_structure() {
        let html = "<html><head><style>p { color: red }</style></head><body>\
                    <p>Customer: Jane&nbsp;Roe</p><div>Start: 18/08/2025</div>\
                    Total: 10 &amp; more<br/>End</body></html>";
        let text = strip_html(html);
        assert!(!text.contains("color"));
        assert!(text.contains("Customer: Jane Roe\n"));
        assert!(text.contains("Start: 18/08/2025\n"));
        assert!(text.contains("Total: 10 & more\nEnd"));
    }

    #[test]
    fn table_cells_are_separated() {
        let text = strip_html("<table><tr><td>Name:</td><td>Jane</td></tr></table>");
        assert!(text.contains("Name: Jane"));
    }

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(strip_html("a > b"), "a > b");
    }
}
