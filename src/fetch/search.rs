// src/fetch/search.rs
//! Search providers: a scraping DuckDuckGo provider for live runs and a
//! static provider for tests/offline runs.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::fetch::types::{SearchHit, SearchProvider};

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

/// Anchors of the result list on the DuckDuckGo HTML endpoint. The href may
/// be a `/l/?uddg=<percent-encoded>` redirect; both forms are handled.
fn result_link_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<a[^>]+class="[^"]*result__a[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("result link regex")
    })
}

fn tag_strip_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag strip regex"))
}

pub struct DuckDuckGoProvider {
    http: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("research-deck-pipeline/0.1 (+research agent)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self { http }
    }

    /// Pull ranked result links out of the HTML result page.
    pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        for caps in result_link_re().captures_iter(html) {
            let href = html_escape::decode_html_entities(&caps[1]).to_string();
            let Some(url) = resolve_result_href(&href) else {
                continue;
            };
            let title_raw = tag_strip_re().replace_all(&caps[2], "");
            let title = html_escape::decode_html_entities(title_raw.trim()).to_string();
            hits.push(SearchHit {
                url,
                title: (!title.is_empty()).then_some(title),
            });
            if hits.len() >= max_results {
                break;
            }
        }
        hits
    }
}

impl Default for DuckDuckGoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let resp = self
            .http
            .get(DUCKDUCKGO_HTML_URL)
            .query(&[("q", query)])
            .send()
            .await
            .context("duckduckgo request")?
            .error_for_status()
            .context("duckduckgo status")?;
        let body = resp.text().await.context("duckduckgo body")?;
        Ok(Self::parse_results(&body, max_results))
    }

    fn name(&self) -> &'static str {
        "duckduckgo"
    }
}

/// Direct links pass through; `/l/?uddg=...` redirect links are unwrapped.
fn resolve_result_href(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        if let Ok(url) = url::Url::parse(href) {
            if url.path() == "/l/" {
                if let Some((_, target)) = url.query_pairs().find(|(k, _)| k == "uddg") {
                    let target = target.to_string();
                    if target.starts_with("http") {
                        return Some(target);
                    }
                }
            }
        }
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return resolve_result_href(&format!("https://{rest}"));
    }
    if href.starts_with("/l/") {
        return resolve_result_href(&format!("https://duckduckgo.com{href}"));
    }
    None
}

/// Fixed hit list; used by tests and offline demos.
pub struct StaticSearchProvider {
    hits: Vec<SearchHit>,
}

impl StaticSearchProvider {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direct_and_redirect_links() {
        let html = r##"
            <div class="result">
              <a rel="nofollow" class="result__a" href="https://example.com/quantum">Quantum <b>computing</b> primer</a>
            </div>
            <div class="result">
              <a class="result__a otherclass" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.org%2Fqubits&amp;rut=abc">Qubits explained</a>
            </div>
        "##;
        let hits = DuckDuckGoProvider::parse_results(html, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://example.com/quantum");
        assert_eq!(hits[0].title.as_deref(), Some("Quantum computing primer"));
        assert_eq!(hits[1].url, "https://example.org/qubits");
    }

    #[test]
    fn respects_max_results_and_skips_relative_junk() {
        let html = r#"
            <a class="result__a" href="/settings">Settings</a>
            <a class="result__a" href="https://a.test/1">one</a>
            <a class="result__a" href="https://a.test/2">two</a>
        "#;
        let hits = DuckDuckGoProvider::parse_results(html, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://a.test/1");
    }
}
