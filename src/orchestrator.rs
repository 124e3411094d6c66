// src/orchestrator.rs
//! Job orchestration: drives the stage sequence, owns job state, applies the
//! global deadline, and emits every progress event.
//!
//! Stage failure policy, in one place: per-item failures stay inside their
//! stage; a stage with zero usable outputs or a fatal category (assembly,
//! deadline) becomes the job's single terminal ERROR event. Everything else
//! degrades and continues.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::charts::{ChartPlanner, ChartRenderer, ChartSpec};
use crate::config::Settings;
use crate::deck::render::DeckRenderer;
use crate::deck::DeckAssembler;
use crate::error::PipelineError;
use crate::events::{EventChannel, EventStream, PipelineEvent};
use crate::extract::{self, ExtractLimits};
use crate::fetch::types::{SearchProvider, Source};
use crate::fetch::SourceFetcher;
use crate::job::{Job, JobOutcome, JobRegistry, JobStatus};
use crate::retry::RetryPolicy;
use crate::summarize::llm::DynLlmClient;
use crate::summarize::{Insight, Summarizer};
use crate::theme::ThemeConfig;

const KEY_POINT_COUNT: usize = 5;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct JobOrchestrator {
    fetcher: SourceFetcher,
    summarizer: Summarizer,
    planner: ChartPlanner,
    assembler: DeckAssembler,
    chart_renderer: Arc<dyn ChartRenderer>,
    deck_renderer: Arc<dyn DeckRenderer>,
    events: Arc<EventChannel>,
    jobs: Arc<JobRegistry>,
    extract_limits: ExtractLimits,
    job_deadline: Duration,
    default_max_sources: usize,
    public_base_url: String,
}

impl JobOrchestrator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        llm: DynLlmClient,
        chart_renderer: Arc<dyn ChartRenderer>,
        deck_renderer: Arc<dyn DeckRenderer>,
        settings: &Settings,
    ) -> Arc<Self> {
        let p = &settings.pipeline;
        Arc::new(Self {
            fetcher: SourceFetcher::new(search, p),
            summarizer: Summarizer::new(
                llm,
                p.summary_batch_size,
                p.claim_similarity_threshold,
                RetryPolicy::from_config(&p.retry),
                p.fetch_concurrency,
            ),
            planner: ChartPlanner::new(p.max_charts),
            assembler: DeckAssembler::new(p.max_slides),
            chart_renderer,
            deck_renderer,
            events: Arc::new(EventChannel::new()),
            jobs: Arc::new(JobRegistry::new(Duration::from_secs(p.retention_secs))),
            extract_limits: ExtractLimits {
                min_chars: p.min_extract_chars,
                max_chars: p.max_extract_chars,
            },
            job_deadline: Duration::from_secs(p.job_deadline_secs),
            default_max_sources: p.default_max_sources,
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn default_max_sources(&self) -> usize {
        self.default_max_sources
    }

    /// Create a job and kick off its pipeline; returns immediately.
    pub fn start(
        self: &Arc<Self>,
        topic: String,
        max_sources: usize,
        theme: ThemeConfig,
    ) -> Uuid {
        let job = Job::new(topic.clone(), max_sources, theme.clone());
        let id = job.id;
        self.events.register(id);
        self.jobs.insert(job);
        counter!("jobs_started_total").increment(1);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_job(id, topic, max_sources, theme).await;
        });
        id
    }

    /// The job's remaining event stream; `None` for unknown/swept jobs.
    pub fn subscribe(&self, job_id: Uuid) -> Option<EventStream> {
        self.events.subscribe(job_id)
    }

    pub fn job(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.get(job_id)
    }

    /// Periodic cleanup of terminal jobs past their retention window.
    pub fn spawn_retention_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                for id in this.jobs.sweep_expired(chrono::Utc::now()) {
                    this.events.remove(id);
                    tracing::debug!(job_id = %id, "swept terminal job");
                }
            }
        })
    }

    async fn run_job(self: Arc<Self>, id: Uuid, topic: String, max_sources: usize, theme: ThemeConfig) {
        self.jobs.set_status(id, JobStatus::Running);
        let started = std::time::Instant::now();

        // The deadline wraps the whole pipeline; on expiry the in-flight
        // stage future is dropped and downstream work never starts.
        let outcome = match tokio::time::timeout(
            self.job_deadline,
            self.drive(id, &topic, max_sources, theme),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::DeadlineExceeded(self.job_deadline)),
        };
        histogram!("job_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(outcome) => {
                counter!("jobs_done_total").increment(1);
                tracing::info!(job_id = %id, slides = outcome.slide_count, "job done");
                self.jobs.set_outcome(id, outcome.clone());
                self.jobs.set_status(id, JobStatus::Done);
                self.events.publish(
                    id,
                    PipelineEvent::Done {
                        topic,
                        ppt_filename: outcome.ppt_filename,
                        ppt_url: outcome.ppt_url,
                    },
                );
            }
            Err(error) => {
                counter!("jobs_error_total").increment(1);
                tracing::warn!(job_id = %id, error = %error, "job failed");
                self.jobs.set_status(id, JobStatus::Error);
                self.events.publish(
                    id,
                    PipelineEvent::Error {
                        message: error.to_string(),
                    },
                );
            }
        }
    }

    /// The stage script. Emits progress along the way; returns the outcome
    /// or the single error the terminal event will carry.
    async fn drive(
        &self,
        id: Uuid,
        topic: &str,
        max_sources: usize,
        theme: ThemeConfig,
    ) -> Result<JobOutcome, PipelineError> {
        // --- Stage 1+2: fetch, extracting incrementally in completion order ---
        self.progress(id, format!("Searching the web for \"{topic}\"…"));
        let mut rx = self.fetcher.fetch(topic, max_sources).await?;

        let mut sources: Vec<Source> = Vec::with_capacity(max_sources);
        let mut fetched_ok = 0usize;
        while let Some(source) = rx.recv().await {
            if source.is_ok() {
                fetched_ok += 1;
            }
            let source = extract::extract(source, &self.extract_limits);
            if source.is_ok() {
                self.progress(id, format!("Retrieved {}", source.url));
            }
            sources.push(source);
        }

        let total = sources.len();
        let usable = sources.iter().filter(|s| s.is_ok()).count();
        if usable == 0 {
            // Distinguish dead network from pages that fetched but carried
            // no usable text; the terminal message should say which.
            return Err(if fetched_ok > 0 {
                PipelineError::Extraction(format!(
                    "all {fetched_ok} fetched pages yielded unusable text"
                ))
            } else {
                PipelineError::SourceFetch(format!("all {total} source fetches failed"))
            });
        }
        if usable < total {
            self.progress(
                id,
                format!("Proceeding with {usable} of {total} sources; the rest failed."),
            );
        } else {
            self.progress(id, format!("Fetched {usable} sources."));
        }

        // --- Stage 3: summarize ---
        self.progress(id, format!("Summarizing {usable} sources…"));
        let insights = self.summarizer.summarize(topic, &sources).await?;
        self.progress(id, format!("Synthesized {} insights.", insights.len()));

        // --- Stage 4: plan + render charts ---
        self.progress(id, "Deriving charts from quantitative insights…".to_string());
        let charts = self.render_charts(id, &insights, &theme);
        if charts.iter().all(|c| c.rendered_image_ref.is_none()) {
            self.progress(id, "No chartable data found; deck will be text-only.".to_string());
        }

        // --- Stage 5: assemble + render the deck ---
        self.progress(id, "Assembling the deck…".to_string());
        let mut deck = self
            .assembler
            .assemble(topic, &insights, &charts, theme);
        let rendered = self
            .deck_renderer
            .render(topic, &deck)
            .map_err(|e| PipelineError::Assembly(format!("{e:#}")))?;
        deck.output_path = Some(rendered.path.clone());

        let ppt_url = format!("{}/outputs/{}", self.public_base_url, rendered.filename);
        Ok(JobOutcome {
            ppt_filename: rendered.filename,
            ppt_url,
            slide_count: deck.slide_count(),
            summary: insights.first().map(|i| i.claim_text.clone()),
            key_points: insights
                .iter()
                .take(KEY_POINT_COUNT)
                .map(|i| i.claim_text.clone())
                .collect(),
        })
    }

    /// Plan chart specs and render each one, dropping individual failures.
    fn render_charts(
        &self,
        id: Uuid,
        insights: &[Insight],
        theme: &ThemeConfig,
    ) -> Vec<ChartSpec> {
        let mut specs = self.planner.plan(insights);
        let stem = short_id(id);
        for (idx, spec) in specs.iter_mut().enumerate() {
            match self
                .chart_renderer
                .render(&format!("{stem}_chart_{idx}"), spec, theme)
            {
                Ok(path) => {
                    let filename = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let web_path = format!("/charts/{filename}");
                    spec.rendered_image_ref = Some(web_path.clone());
                    counter!("charts_rendered_total").increment(1);
                    self.events.publish(
                        id,
                        PipelineEvent::ChartGenerated {
                            chart_path: web_path,
                            message: Some(spec.caption.clone()),
                        },
                    );
                }
                Err(e) => {
                    // Never escalates; the deck just loses this chart.
                    counter!("charts_failed_total").increment(1);
                    tracing::warn!(job_id = %id, error = %e, "chart render failed, dropping chart");
                }
            }
        }
        specs
    }

    fn progress(&self, id: Uuid, message: String) {
        tracing::debug!(job_id = %id, %message, "progress");
        self.events.publish(id, PipelineEvent::Progress { message });
    }
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
