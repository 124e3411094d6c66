// src/summarize/mod.rs
//! Insight synthesis: batch the usable sources through the LLM, retry each
//! batch on its own budget, then merge near-identical claims across batches.

pub mod llm;

use std::collections::BTreeSet;

use futures_util::StreamExt;
use metrics::counter;
use serde::Deserialize;
use strsim::normalized_levenshtein;

use crate::error::PipelineError;
use crate::fetch::types::Source;
use crate::retry::RetryPolicy;
use crate::summarize::llm::DynLlmClient;

/// One synthesized, citation-backed claim about the topic. Immutable once
/// the summarizer returns it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Insight {
    pub claim_text: String,
    /// Non-empty subset of the job's OK source URLs.
    pub supporting_source_urls: BTreeSet<String>,
    /// 0.0..=1.0; higher ranks first in chart planning and deck order.
    pub rank: f64,
}

#[derive(Debug, Deserialize)]
struct ClaimsReply {
    #[serde(default)]
    claims: Vec<RawClaim>,
}

fn default_rank() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct RawClaim {
    claim: String,
    #[serde(default)]
    source_urls: Vec<String>,
    #[serde(default = "default_rank")]
    rank: f64,
}

pub struct Summarizer {
    llm: DynLlmClient,
    batch_size: usize,
    similarity_threshold: f64,
    retry: RetryPolicy,
    concurrency: usize,
    /// Per-source char budget inside a batch prompt.
    prompt_chars_per_source: usize,
}

impl Summarizer {
    pub fn new(
        llm: DynLlmClient,
        batch_size: usize,
        similarity_threshold: f64,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            llm,
            batch_size: batch_size.max(1),
            similarity_threshold,
            retry,
            concurrency: concurrency.max(1),
            prompt_chars_per_source: 6_000,
        }
    }

    /// Summarize the usable sources into ranked, deduplicated insights.
    ///
    /// Batches run concurrently up to the worker bound; a batch only counts
    /// as failed after its retry budget is spent. The stage fails only when
    /// every batch failed or no batch yielded a usable claim.
    pub async fn summarize(
        &self,
        topic: &str,
        sources: &[Source],
    ) -> Result<Vec<Insight>, PipelineError> {
        let usable: Vec<&Source> = sources
            .iter()
            .filter(|s| s.is_ok() && s.extracted_text.is_some())
            .collect();
        if usable.is_empty() {
            return Err(PipelineError::Summarization(
                "no usable sources to summarize".to_string(),
            ));
        }
        // Slash-insensitive citation matching; models echo URLs inconsistently.
        let ok_urls: BTreeSet<String> = usable
            .iter()
            .map(|s| s.url.trim_end_matches('/').to_string())
            .collect();

        let batches: Vec<Vec<&Source>> = usable
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();

        // Bounded, unordered fan-out over the batches. An explicit
        // `FuturesUnordered` (rather than `StreamExt::map` + `buffer_unordered`)
        // keeps the per-batch futures at a concrete lifetime, which the
        // higher-ranked `Send` bound on the spawned job requires.
        let mut pending = batches.into_iter().enumerate();
        let mut in_flight = futures_util::stream::FuturesUnordered::new();
        for _ in 0..self.concurrency {
            match pending.next() {
                Some((idx, batch)) => in_flight.push(self.summarize_batch_indexed(idx, topic, batch)),
                None => break,
            }
        }

        // Collected keyed by batch index: merge order must not depend on
        // which batch happened to finish first.
        let mut ok_batches: Vec<(usize, Vec<RawClaim>)> = Vec::new();
        let mut failed_batches = 0usize;
        let mut last_error = String::new();
        while let Some((idx, result)) = in_flight.next().await {
            match result {
                Ok(batch_claims) => {
                    counter!("summarize_batches_ok_total").increment(1);
                    ok_batches.push((idx, batch_claims));
                }
                Err(e) => {
                    counter!("summarize_batches_failed_total").increment(1);
                    tracing::warn!(batch = idx, error = %e, "summarization batch failed");
                    failed_batches += 1;
                    last_error = format!("{e:#}");
                }
            }
            if let Some((idx, batch)) = pending.next() {
                in_flight.push(self.summarize_batch_indexed(idx, topic, batch));
            }
        }
        drop(in_flight);
        ok_batches.sort_by_key(|(idx, _)| *idx);
        let claims: Vec<RawClaim> = ok_batches
            .into_iter()
            .flat_map(|(_, claims)| claims)
            .collect();

        if failed_batches == total_batches {
            return Err(PipelineError::Summarization(format!(
                "all {total_batches} batches failed, last error: {last_error}"
            )));
        }

        let insights = merge_claims(claims, &ok_urls, self.similarity_threshold);
        if insights.is_empty() {
            return Err(PipelineError::Summarization(
                "no citation-backed claims produced".to_string(),
            ));
        }
        tracing::info!(
            insights = insights.len(),
            failed_batches,
            total_batches,
            "summarization complete"
        );
        Ok(insights)
    }

    /// Thin wrapper that pairs a batch's result with its index. Named async
    /// fns carry the higher-ranked lifetime bounds that `buffer_unordered`
    /// needs, which an inline async block over borrowed sources does not.
    async fn summarize_batch_indexed(
        &self,
        idx: usize,
        topic: &str,
        batch: Vec<&Source>,
    ) -> (usize, anyhow::Result<Vec<RawClaim>>) {
        (idx, self.summarize_batch_with_retry(topic, &batch).await)
    }

    async fn summarize_batch_with_retry(
        &self,
        topic: &str,
        batch: &[&Source],
    ) -> anyhow::Result<Vec<RawClaim>> {
        let (system, user) = self.build_prompt(topic, batch);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .llm
                .complete_json(&system, &user)
                .await
                .and_then(|value| {
                    let reply: ClaimsReply = serde_json::from_value(value)?;
                    Ok(reply.claims)
                });
            match result {
                Ok(claims) => return Ok(claims),
                Err(e) if attempt < self.retry.max_attempts => {
                    tracing::warn!(attempt, error = %e, "batch call failed, backing off");
                    self.retry.sleep_before_retry(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn build_prompt(&self, topic: &str, batch: &[&Source]) -> (String, String) {
        let system = "You are a senior research analyst. From the numbered sources, extract \
            the most important claims about the topic. Reply with JSON only, shaped as \
            {\"claims\": [{\"claim\": string, \"source_urls\": [string], \"rank\": number 0..1}]}. \
            Every claim must cite one or more of the given source URLs verbatim. \
            Prefer claims carrying concrete figures (years, percentages, rankings)."
            .to_string();

        let mut user = format!("Topic: {topic}\n\n");
        for (i, source) in batch.iter().enumerate() {
            let text = source.extracted_text.as_deref().unwrap_or("");
            let clipped: String = text.chars().take(self.prompt_chars_per_source).collect();
            user.push_str(&format!(
                "### Source {}\nURL: {}\nTITLE: {}\nCONTENT:\n{}\n\n",
                i + 1,
                source.url,
                source.title.as_deref().unwrap_or("(untitled)"),
                clipped
            ));
        }
        (system, user)
    }
}

/// Merge near-identical claims across batches: duplicates pool their
/// citations and keep the best rank instead of appearing twice. Citations
/// outside the OK-source set are discarded; a claim left with none is
/// dropped entirely.
fn merge_claims(
    claims: Vec<RawClaim>,
    ok_urls: &BTreeSet<String>,
    similarity_threshold: f64,
) -> Vec<Insight> {
    let mut merged: Vec<Insight> = Vec::new();
    for raw in claims {
        let claim_text = raw.claim.trim().to_string();
        if claim_text.is_empty() {
            continue;
        }
        let urls: BTreeSet<String> = raw
            .source_urls
            .iter()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| ok_urls.contains(u))
            .collect();
        if urls.is_empty() {
            counter!("summarize_claims_uncited_total").increment(1);
            continue;
        }
        let rank = raw.rank.clamp(0.0, 1.0);

        let lowered = claim_text.to_lowercase();
        if let Some(existing) = merged.iter_mut().find(|ins| {
            normalized_levenshtein(&ins.claim_text.to_lowercase(), &lowered)
                >= similarity_threshold
        }) {
            existing.supporting_source_urls.extend(urls);
            existing.rank = existing.rank.max(rank);
            continue;
        }
        merged.push(Insight {
            claim_text,
            supporting_source_urls: urls,
            rank,
        });
    }

    // Rank order, text as tie-break, stable across runs.
    merged.sort_by(|a, b| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.claim_text.cmp(&b.claim_text))
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(claim: &str, urls: &[&str], rank: f64) -> RawClaim {
        RawClaim {
            claim: claim.to_string(),
            source_urls: urls.iter().map(|u| u.to_string()).collect(),
            rank,
        }
    }

    fn ok_set(urls: &[&str]) -> BTreeSet<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn near_duplicates_merge_urls_and_keep_best_rank() {
        let ok = ok_set(&["https://a.test/1", "https://a.test/2"]);
        let claims = vec![
            raw("Quantum computers reached 1000 qubits in 2023.", &["https://a.test/1"], 0.7),
            raw("Quantum computers reached 1,000 qubits in 2023.", &["https://a.test/2"], 0.9),
        ];
        let merged = merge_claims(claims, &ok, 0.85);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].supporting_source_urls.len(), 2);
        assert_eq!(merged[0].rank, 0.9);
    }

    #[test]
    fn uncited_and_foreign_citations_are_dropped() {
        let ok = ok_set(&["https://a.test/1"]);
        let claims = vec![
            raw("Claim with a fabricated citation.", &["https://evil.test/x"], 0.9),
            raw("Claim with no citation at all.", &[], 0.9),
            raw("Properly cited claim.", &["https://a.test/1"], 0.4),
        ];
        let merged = merge_claims(claims, &ok, 0.85);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].claim_text, "Properly cited claim.");
    }

    #[test]
    fn distinct_claims_survive_and_sort_by_rank() {
        let ok = ok_set(&["https://a.test/1"]);
        let claims = vec![
            raw("Market grew 12% in 2024.", &["https://a.test/1"], 0.5),
            raw("Regulation tightened across the EU.", &["https://a.test/1"], 0.8),
        ];
        let merged = merge_claims(claims, &ok, 0.85);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].claim_text, "Regulation tightened across the EU.");
    }
}
