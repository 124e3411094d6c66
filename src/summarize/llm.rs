// src/summarize/llm.rs
//! LLM boundary: provider abstraction + an OpenAI-compatible client +
//! an in-memory memo wrapper so identical batch prompts are paid for once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

/// A structured-JSON completion call. Implementations return the parsed JSON
/// value; prompt wording and transport live behind this seam.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value>;
    fn provider_name(&self) -> &'static str;
}

pub type DynLlmClient = std::sync::Arc<dyn LlmClient>;

/// Factory: build a client according to config. An unknown provider or a
/// missing key yields the disabled client; jobs then fail at the
/// summarization stage with a clear message instead of at boot.
pub fn build_llm_client(cfg: &LlmConfig) -> DynLlmClient {
    match cfg.provider.as_str() {
        "openai" if !cfg.api_key.trim().is_empty() => std::sync::Arc::new(MemoizingClient::new(
            OpenAiClient::new(cfg.api_key.clone(), cfg.model.clone(), cfg.request_timeout_secs),
        )),
        "openai" => {
            tracing::warn!("OPENAI_API_KEY not set; summarization will fail until configured");
            std::sync::Arc::new(DisabledClient)
        }
        other => {
            tracing::warn!(provider = other, "unsupported llm provider; summarization disabled");
            std::sync::Arc::new(DisabledClient)
        }
    }
}

/// OpenAI chat-completions client. Requires an API key.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("research-deck-pipeline/0.1 (+research agent)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("llm request")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("llm http status {status}");
        }
        let body: Resp = resp.json().await.context("llm response body")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        parse_json_reply(content)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Models wrap JSON in markdown fences often enough that tolerating it is
/// cheaper than re-asking.
pub fn parse_json_reply(content: &str) -> Result<serde_json::Value> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_start())
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    serde_json::from_str(stripped.trim()).context("llm reply is not valid JSON")
}

/// Errors on every call; used when no provider is configured.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<serde_json::Value> {
        anyhow::bail!("llm client disabled (no provider/api key configured)")
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Memoizes successful replies by prompt hash for the process lifetime.
/// Retries of an identical batch (and re-runs of the same topic) skip the
/// remote call; failures are never cached.
pub struct MemoizingClient<C> {
    inner: C,
    cache: Mutex<HashMap<String, serde_json::Value>>,
}

impl<C: LlmClient> MemoizingClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

fn prompt_key(system: &str, user: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(system.as_bytes());
    hasher.update([0u8]);
    hasher.update(user.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[async_trait]
impl<C: LlmClient> LlmClient for MemoizingClient<C> {
    async fn complete_json(&self, system: &str, user: &str) -> Result<serde_json::Value> {
        let key = prompt_key(system, user);
        if let Some(hit) = self.cache.lock().expect("llm cache poisoned").get(&key) {
            metrics::counter!("llm_cache_hits_total").increment(1);
            return Ok(hit.clone());
        }
        let fresh = self.inner.complete_json(system, user).await?;
        self.cache
            .lock()
            .expect("llm cache poisoned")
            .insert(key, fresh.clone());
        Ok(fresh)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_fenced_and_bare_json() {
        let bare = parse_json_reply(r#"{"claims": []}"#).unwrap();
        assert!(bare["claims"].is_array());

        let fenced = parse_json_reply("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(fenced["a"], 1);

        assert!(parse_json_reply("not json at all").is_err());
    }

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for CountingClient {
        async fn complete_json(&self, _s: &str, _u: &str) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
        }
        fn provider_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn memoizer_deduplicates_identical_prompts() {
        let client = MemoizingClient::new(CountingClient {
            calls: AtomicUsize::new(0),
        });
        let a = client.complete_json("sys", "user").await.unwrap();
        let b = client.complete_json("sys", "user").await.unwrap();
        let _ = client.complete_json("sys", "other").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }
}
