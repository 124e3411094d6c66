// src/fetch/mod.rs
//! Source fetching: search, URL dedup, and bounded concurrent page retrieval
//! with per-source failure isolation.
//!
//! Sources are yielded in completion order over a channel so extraction can
//! start before the slowest fetch resolves. One source's failure (timeout,
//! non-success status, non-text content type) never aborts its siblings; it
//! surfaces as a FAILED `Source` record instead.

pub mod search;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetch::types::{FetchStatus, SearchHit, SearchProvider, Source};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_sources_total", "Source fetches attempted.");
        describe_counter!("fetch_failed_total", "Source fetches that failed.");
        describe_counter!(
            "fetch_dedup_total",
            "Search hits dropped by URL deduplication."
        );
        describe_histogram!("fetch_page_ms", "Per-page fetch time in milliseconds.");
    });
}

/// Scheme/host lowercased, fragment and default port and trailing slash
/// stripped; the dedup key for search hits.
pub fn normalize_url(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let port = match url.port() {
        Some(p) if Some(p) != default_port(url.scheme()) => format!(":{p}"),
        _ => String::new(),
    };
    let path = url.path().trim_end_matches('/');
    let query = url
        .query()
        .map(|q| format!("?{q}"))
        .unwrap_or_default();
    Some(format!("{}://{host}{port}{path}{query}", url.scheme()))
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Drop hits whose normalized URL repeats an earlier one, keep rank order.
pub fn dedup_hits(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(hits.len());
    let mut dropped = 0usize;
    for hit in hits {
        let Some(key) = normalize_url(&hit.url) else {
            dropped += 1;
            continue;
        };
        if !seen.insert(key) {
            dropped += 1;
            continue;
        }
        out.push(hit);
    }
    if dropped > 0 {
        counter!("fetch_dedup_total").increment(dropped as u64);
    }
    out
}

pub struct SourceFetcher {
    http: reqwest::Client,
    search: Arc<dyn SearchProvider>,
    concurrency: usize,
    fetch_timeout: Duration,
}

impl SourceFetcher {
    pub fn new(search: Arc<dyn SearchProvider>, cfg: &PipelineConfig) -> Self {
        let fetch_timeout = Duration::from_secs(cfg.fetch_timeout_secs);
        let http = reqwest::Client::builder()
            .user_agent("research-deck-pipeline/0.1 (+research agent)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(fetch_timeout)
            .build()
            .expect("reqwest client");
        Self {
            http,
            search,
            concurrency: cfg.fetch_concurrency,
            fetch_timeout,
        }
    }

    /// Search, dedup, and fan out the page fetches. The receiver yields each
    /// `Source` as its fetch resolves — completion order, not rank order —
    /// and closes once all are in. Errors here mean the whole stage is
    /// unusable (search failed or returned nothing); per-page failures do
    /// not error, they yield FAILED records.
    pub async fn fetch(
        &self,
        query: &str,
        max_sources: usize,
    ) -> Result<mpsc::Receiver<Source>, PipelineError> {
        ensure_metrics_described();

        // Over-ask the engine a little so dedup still fills max_sources.
        let hits = self
            .search
            .search(query, max_sources.saturating_mul(2))
            .await
            .map_err(|e| PipelineError::SourceFetch(format!("web search failed: {e:#}")))?;

        let mut targets = dedup_hits(hits);
        targets.truncate(max_sources);
        if targets.is_empty() {
            return Err(PipelineError::SourceFetch(
                "web search returned no results".to_string(),
            ));
        }
        tracing::info!(provider = self.search.name(), hits = targets.len(), "search complete");

        let (tx, rx) = mpsc::channel(targets.len());
        let http = self.http.clone();
        let fetch_timeout = self.fetch_timeout;
        let concurrency = self.concurrency;
        tokio::spawn(async move {
            let mut stream = futures_util::stream::iter(targets)
                .map(|hit| fetch_one(http.clone(), hit, fetch_timeout))
                .buffer_unordered(concurrency);
            while let Some(source) = stream.next().await {
                // Receiver dropped means the job was cancelled; just stop.
                if tx.send(source).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

async fn fetch_one(http: reqwest::Client, hit: SearchHit, timeout: Duration) -> Source {
    counter!("fetch_sources_total").increment(1);
    let t0 = std::time::Instant::now();
    let result = tokio::time::timeout(timeout, fetch_page(&http, &hit.url)).await;
    histogram!("fetch_page_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    match result {
        Ok(Ok(body)) => Source {
            url: hit.url,
            title: hit.title,
            raw_content: Some(body),
            extracted_text: None,
            fetch_status: FetchStatus::Ok,
            failure: None,
        },
        Ok(Err(reason)) => {
            counter!("fetch_failed_total").increment(1);
            tracing::warn!(url = %hit.url, error = %reason, "source fetch failed");
            Source::failed(hit.url, hit.title, reason.to_string())
        }
        Err(_) => {
            counter!("fetch_failed_total").increment(1);
            tracing::warn!(url = %hit.url, "source fetch timed out");
            Source::failed(hit.url, hit.title, format!("timed out after {timeout:?}"))
        }
    }
}

async fn fetch_page(http: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("http status {status}");
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !is_texty(&content_type) {
        anyhow::bail!("unsupported content type '{content_type}'");
    }
    Ok(resp.text().await?)
}

fn is_texty(content_type: &str) -> bool {
    // Missing header is common enough on small sites to give benefit of doubt.
    content_type.is_empty()
        || content_type.starts_with("text/")
        || content_type.starts_with("application/xhtml")
        || content_type.starts_with("application/xml")
}
