// src/fetch/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Lifecycle of one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FetchStatus {
    Pending,
    Ok,
    Failed,
}

/// One web page and its derived text. Mutated only by the fetcher and then
/// the extractor; FAILED sources are retained for audit but never flow
/// downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: Option<String>,
    pub raw_content: Option<String>,
    pub extracted_text: Option<String>,
    pub fetch_status: FetchStatus,
    /// Short reason when fetch_status is FAILED.
    pub failure: Option<String>,
}

impl Source {
    pub fn pending(url: String, title: Option<String>) -> Self {
        Self {
            url,
            title,
            raw_content: None,
            extracted_text: None,
            fetch_status: FetchStatus::Pending,
            failure: None,
        }
    }

    pub fn failed(url: String, title: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            url,
            title,
            raw_content: None,
            extracted_text: None,
            fetch_status: FetchStatus::Failed,
            failure: Some(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.fetch_status == FetchStatus::Ok
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
}

/// Search-engine boundary. Implementations return ranked hits; everything
/// after ranking (dedup, fetch, extraction) is the pipeline's concern.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
    fn name(&self) -> &'static str;
}
