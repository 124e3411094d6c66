// tests/common/mod.rs
// Shared scaffolding for the integration tests: a local page server standing
// in for the open web, a scripted LLM, and an orchestrator builder wired to
// temp directories.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use serde_json::json;

use research_deck_pipeline::config::Settings;
use research_deck_pipeline::charts::SvgChartRenderer;
use research_deck_pipeline::deck::render::HtmlDeckRenderer;
use research_deck_pipeline::fetch::search::StaticSearchProvider;
use research_deck_pipeline::fetch::types::SearchHit;
use research_deck_pipeline::orchestrator::JobOrchestrator;
use research_deck_pipeline::summarize::llm::LlmClient;

/// A page long enough to clear the extract minimum used in tests.
fn page(topic_word: &str) -> String {
    format!(
        "<html><head><title>{topic_word}</title></head><body><article>{}</article></body></html>",
        format!(
            "This page discusses {topic_word} in useful depth. The field grew quickly \
             and analysts cite adoption figures, vendor comparisons and open problems. "
        )
        .repeat(8)
    )
}

/// Local stand-in for the open web. `/good/{n}` serves article pages,
/// `/fail/{n}` serves 500s, `/tiny` serves a page below any sane extract
/// minimum, `/binary` claims a PDF content type.
pub async fn spawn_page_server() -> SocketAddr {
    let app = Router::new()
        .route(
            "/good/{n}",
            get(|axum::extract::Path(n): axum::extract::Path<u32>| async move {
                axum::response::Html(page(&format!("subject-{n}")))
            }),
        )
        .route(
            "/fail/{n}",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "nope").into_response() }),
        )
        .route("/tiny", get(|| async { axum::response::Html("<p>hi</p>".to_string()) }))
        .route(
            "/binary",
            get(|| async {
                ([(axum::http::header::CONTENT_TYPE, "application/pdf")], "%PDF-1.4")
                    .into_response()
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind page server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("page server");
    });
    addr
}

pub fn hit(addr: SocketAddr, path: &str) -> SearchHit {
    SearchHit {
        url: format!("http://{addr}{path}"),
        title: Some(path.trim_start_matches('/').to_string()),
    }
}

/// Scripted LLM: extracts the source URLs from the batch prompt and returns
/// one claim per source, with claim text chosen by the test.
pub struct ScriptedLlm {
    /// Claim template; `{i}` is replaced with the source index.
    pub claim_template: String,
}

impl ScriptedLlm {
    pub fn text_only() -> Self {
        Self {
            claim_template: "Analysts broadly agree on direction for area {i}.".to_string(),
        }
    }

    pub fn quantitative() -> Self {
        Self {
            claim_template:
                "Deployments rose steadily, with 2021: 12, 2022: 25 and 2024: 48 in region {i}."
                    .to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete_json(&self, _system: &str, user: &str) -> Result<serde_json::Value> {
        let urls: Vec<&str> = user
            .lines()
            .filter_map(|line| line.strip_prefix("URL: "))
            .collect();
        let claims: Vec<serde_json::Value> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                json!({
                    "claim": self.claim_template.replace("{i}", &i.to_string()),
                    "source_urls": [url],
                    "rank": 0.5 + (i as f64) * 0.05,
                })
            })
            .collect();
        Ok(json!({ "claims": claims }))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// An LLM whose every call fails; drives the all-batches-failed path.
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<serde_json::Value> {
        anyhow::bail!("scripted outage")
    }

    fn provider_name(&self) -> &'static str {
        "failing"
    }
}

/// An LLM that sleeps past any short test deadline.
pub struct SlowLlm;

#[async_trait]
impl LlmClient for SlowLlm {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<serde_json::Value> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(json!({ "claims": [] }))
    }

    fn provider_name(&self) -> &'static str {
        "slow"
    }
}

pub struct TestHarness {
    pub orchestrator: Arc<JobOrchestrator>,
    pub settings: Settings,
    // Held so the artifact dirs outlive the test body.
    pub _outdir: tempfile::TempDir,
}

/// Orchestrator wired to temp dirs, fast retries, and the given fakes.
pub fn build_harness(
    hits: Vec<SearchHit>,
    llm: Arc<dyn LlmClient>,
    tune: impl FnOnce(&mut Settings),
) -> TestHarness {
    let outdir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.outputs_dir = outdir.path().join("outputs");
    settings.charts_dir = outdir.path().join("outputs/charts");
    settings.pipeline.min_extract_chars = 80;
    settings.pipeline.fetch_timeout_secs = 5;
    settings.pipeline.retry.max_attempts = 2;
    settings.pipeline.retry.base_delay_ms = 10;
    settings.pipeline.retry.jitter_ms = 0;
    tune(&mut settings);

    let orchestrator = JobOrchestrator::new(
        Arc::new(StaticSearchProvider::new(hits)),
        llm,
        Arc::new(SvgChartRenderer::new(&settings.charts_dir)),
        Arc::new(HtmlDeckRenderer::new(&settings.outputs_dir)),
        &settings,
    );
    TestHarness {
        orchestrator,
        settings,
        _outdir: outdir,
    }
}
