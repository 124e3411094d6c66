// src/config.rs
//! Service settings: TOML file + environment overrides.
//!
//! Tuning parameters (extract thresholds, chart/slide caps, deadlines) are
//! configuration, not literals scattered through the pipeline.

use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_public_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_outputs_dir() -> PathBuf {
    PathBuf::from("outputs")
}
fn default_charts_dir() -> PathBuf {
    PathBuf::from("outputs/charts")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Base URL prefixed to `/outputs/...` and `/charts/...` links handed to callers.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,
    #[serde(default = "default_charts_dir")]
    pub charts_dir: PathBuf,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            outputs_dir: default_outputs_dir(),
            charts_dir: default_charts_dir(),
            pipeline: PipelineConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn default_fetch_concurrency() -> usize {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_sources() -> usize {
    5
}
fn default_min_extract_chars() -> usize {
    200
}
fn default_max_extract_chars() -> usize {
    15_000
}
fn default_summary_batch_size() -> usize {
    3
}
fn default_claim_similarity() -> f64 {
    0.85
}
fn default_max_charts() -> usize {
    4
}
fn default_max_slides() -> usize {
    20
}
fn default_job_deadline_secs() -> u64 {
    180
}
fn default_retention_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bounded worker count for concurrent source fetches and batch LLM calls.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Default when the request omits `max_sources`.
    #[serde(default = "default_max_sources")]
    pub default_max_sources: usize,
    /// Sources with less cleaned text than this are marked FAILED.
    #[serde(default = "default_min_extract_chars")]
    pub min_extract_chars: usize,
    /// Cleaned text is truncated (never rejected) at this many chars.
    #[serde(default = "default_max_extract_chars")]
    pub max_extract_chars: usize,
    /// Sources per LLM summarization call.
    #[serde(default = "default_summary_batch_size")]
    pub summary_batch_size: usize,
    /// Normalized Levenshtein at or above which two claims merge.
    #[serde(default = "default_claim_similarity")]
    pub claim_similarity_threshold: f64,
    #[serde(default = "default_max_charts")]
    pub max_charts: usize,
    #[serde(default = "default_max_slides")]
    pub max_slides: usize,
    /// Global per-job deadline; expiry cancels outstanding work.
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,
    /// Terminal jobs are kept this long for late subscribers, then swept.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // serde defaults and Default must agree; routed through the same fns.
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            default_max_sources: default_max_sources(),
            min_extract_chars: default_min_extract_chars(),
            max_extract_chars: default_max_extract_chars(),
            summary_batch_size: default_summary_batch_size(),
            claim_similarity_threshold: default_claim_similarity(),
            max_charts: default_max_charts(),
            max_slides: default_max_slides(),
            job_deadline_secs: default_job_deadline_secs(),
            retention_secs: default_retention_secs(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_retry_jitter_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_ms(),
            jitter_ms: default_retry_jitter_ms(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_api_key() -> String {
    "ENV".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    45
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// "openai" (chat-completions compatible). Case-insensitive.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: default_llm_api_key(),
            request_timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load from `PIPELINE_CONFIG_PATH` (or `config/pipeline.toml`); a missing
    /// file yields defaults so the service still boots in a bare checkout.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut settings: Settings = match fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data)?,
            Err(_) => Settings::default(),
        };

        // Normalize provider
        settings.llm.provider = settings.llm.provider.to_lowercase();

        // Resolve api key if "ENV"
        if settings.llm.api_key.trim().eq_ignore_ascii_case("env") {
            settings.llm.api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        }

        if let Ok(base) = env::var("PUBLIC_BASE_URL") {
            settings.public_base_url = base;
        }

        // Sanitize bounds the pipeline relies on
        let p = &mut settings.pipeline;
        p.fetch_concurrency = p.fetch_concurrency.max(1);
        p.summary_batch_size = p.summary_batch_size.max(1);
        if !(0.0..=1.0).contains(&p.claim_similarity_threshold) {
            p.claim_similarity_threshold = default_claim_similarity();
        }
        if p.min_extract_chars > p.max_extract_chars {
            std::mem::swap(&mut p.min_extract_chars, &mut p.max_extract_chars);
        }

        Ok(settings)
    }
}
