// src/extract.rs
//! Raw HTML → clean plain text.
//!
//! Script/style blocks are removed with their bodies, remaining tags are
//! stripped, entities decoded, whitespace collapsed. Overlong text is
//! truncated, never rejected; text below the minimum length marks the
//! source FAILED so empty husks don't reach the summarizer.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::fetch::types::{FetchStatus, Source};

#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

fn block_strip_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>")
            .expect("block strip regex")
    })
}

fn tag_strip_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag strip regex"))
}

fn ws_collapse_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws collapse regex"))
}

/// Strip markup and boilerplate noise, returning collapsed plain text.
pub fn html_to_text(html: &str) -> String {
    let without_blocks = block_strip_re().replace_all(html, " ");
    let without_tags = tag_strip_re().replace_all(&without_blocks, " ");
    let decoded = html_escape::decode_html_entities(&without_tags).to_string();
    ws_collapse_re().replace_all(&decoded, " ").trim().to_string()
}

/// Char-boundary-safe truncation to at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Derive `extracted_text` for an OK source, or mark it FAILED when the
/// cleaned text is too short to be usable. Non-OK sources pass through
/// untouched.
pub fn extract(mut source: Source, limits: &ExtractLimits) -> Source {
    if source.fetch_status != FetchStatus::Ok {
        return source;
    }
    let raw = source.raw_content.as_deref().unwrap_or("");
    let text = truncate_chars(&html_to_text(raw), limits.max_chars);

    if text.chars().count() < limits.min_chars {
        metrics::counter!("extract_rejected_total").increment(1);
        source.fetch_status = FetchStatus::Failed;
        source.failure = Some(format!(
            "extracted text below minimum length ({} < {})",
            text.chars().count(),
            limits.min_chars
        ));
        source.extracted_text = None;
        return source;
    }

    // Raw HTML has served its purpose; keep memory per job bounded.
    source.raw_content = None;
    source.extracted_text = Some(text);
    source
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_source(html: &str) -> Source {
        Source {
            url: "https://example.com/a".into(),
            title: None,
            raw_content: Some(html.to_string()),
            extracted_text: None,
            fetch_status: FetchStatus::Ok,
            failure: None,
        }
    }

    #[test]
    fn strips_scripts_with_bodies_and_decodes_entities() {
        let html = r#"<html><head><style>body { color: red }</style></head>
            <body><script>var x = "<b>not text</b>";</script>
            <h1>Hello&nbsp;world</h1><p>Rust &amp; research.</p></body></html>"#;
        // &nbsp; decodes to U+00A0, which the whitespace collapse folds away.
        assert_eq!(html_to_text(html), "Hello world Rust & research.");
    }

    #[test]
    fn short_text_marks_source_failed() {
        let limits = ExtractLimits {
            min_chars: 50,
            max_chars: 1000,
        };
        let out = extract(ok_source("<p>too short</p>"), &limits);
        assert_eq!(out.fetch_status, FetchStatus::Failed);
        assert!(out.extracted_text.is_none());
        assert!(out.failure.unwrap().contains("minimum length"));
    }

    #[test]
    fn overflow_truncates_instead_of_failing() {
        let limits = ExtractLimits {
            min_chars: 10,
            max_chars: 40,
        };
        let body = format!("<p>{}</p>", "word ".repeat(50));
        let out = extract(ok_source(&body), &limits);
        assert_eq!(out.fetch_status, FetchStatus::Ok);
        assert_eq!(out.extracted_text.unwrap().chars().count(), 40);
    }

    #[test]
    fn failed_sources_pass_through() {
        let limits = ExtractLimits {
            min_chars: 10,
            max_chars: 40,
        };
        let src = Source::failed("https://example.com/x".into(), None, "dns");
        let out = extract(src, &limits);
        assert_eq!(out.fetch_status, FetchStatus::Failed);
        assert_eq!(out.failure.as_deref(), Some("dns"));
    }
}
