//! Research Deck Service — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the pipeline, routes, and middleware.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use research_deck_pipeline::api::{create_router, AppState};
use research_deck_pipeline::charts::SvgChartRenderer;
use research_deck_pipeline::config::Settings;
use research_deck_pipeline::deck::render::HtmlDeckRenderer;
use research_deck_pipeline::fetch::search::DuckDuckGoProvider;
use research_deck_pipeline::metrics::Metrics;
use research_deck_pipeline::orchestrator::JobOrchestrator;
use research_deck_pipeline::summarize::llm::build_llm_client;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("research_deck_pipeline=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent. Enables OPENAI_API_KEY and
    // PIPELINE_CONFIG_PATH without exporting them by hand.
    let _ = dotenvy::dotenv();

    init_tracing();

    let settings = Settings::load()?;
    std::fs::create_dir_all(&settings.outputs_dir)?;
    std::fs::create_dir_all(&settings.charts_dir)?;

    let metrics = Metrics::init(settings.pipeline.job_deadline_secs);

    let llm = build_llm_client(&settings.llm);
    let orchestrator = JobOrchestrator::new(
        Arc::new(DuckDuckGoProvider::new()),
        llm,
        Arc::new(SvgChartRenderer::new(&settings.charts_dir)),
        Arc::new(HtmlDeckRenderer::new(&settings.outputs_dir)),
        &settings,
    );
    orchestrator.spawn_retention_sweeper();

    let router = create_router(AppState { orchestrator }, &settings).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "research deck service listening");
    axum::serve(listener, router).await?;
    Ok(())
}
