//! LLM summarizer for `agent_message` events, with truncation fallback.
//!
//! Long assistant messages are condensed into one spoken sentence by a
//! local generative endpoint (Ollama-style API). When the endpoint is
//! down the summarizer degrades to plain truncation; availability is
//! re-probed on a fixed interval only while unavailable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::events::{ActivityEvent, ActivityPayload, NarrationEvent, NarrationPriority, SummarizationMethod};

const SUMMARIZATION_PROMPT: &str = "Summarize this AI coding assistant message in one short sentence \
(under 20 words) suitable for text-to-speech narration. \
Focus on what was done or decided, not how.\n\n\
Message:\n{text}\n\nSummary:";

/// Texts at or below this length pass through untouched.
const MAX_TRUNCATION_LENGTH: usize = 1000;
/// Kept prefix when truncating (chars, not bytes).
const TRUNCATED_LENGTH: usize = 990;

pub struct LlmSummarizer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    recheck_interval: Duration,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl LlmSummarizer {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.llm_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            model: config.llm_model.clone(),
            recheck_interval: config.health_recheck,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        })
    }

    /// Initial availability probe. Call once at startup.
    pub async fn start(&self) {
        self.check_health().await;
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Summarize an `agent_message` event into a narration.
    ///
    /// Tries the generative endpoint first and falls back to truncation on
    /// any failure; this method never errors.
    pub async fn summarize(&self, event: &ActivityEvent) -> NarrationEvent {
        let text = match &event.payload {
            ActivityPayload::AgentMessage { text } => text.as_str(),
            _ => "",
        };

        self.maybe_recheck_health().await;

        if self.is_available() {
            match self.call_llm(text).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    return self.narration(event, summary.trim().to_string(), SummarizationMethod::Llm);
                }
                Ok(_) => warn!("LLM returned an empty summary — falling back to truncation"),
                Err(e) => {
                    warn!("LLM summarization failed — falling back to truncation: {e}");
                    self.available.store(false, Ordering::Relaxed);
                    *self.last_health_check.lock() = Instant::now();
                }
            }
        }

        self.narration(event, truncate(text), SummarizationMethod::Truncation)
    }

    async fn call_llm(&self, text: &str) -> Result<String> {
        let prompt = SUMMARIZATION_PROMPT.replace("{text}", text);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": {"num_predict": 50, "temperature": 0.3},
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        Ok(body
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }

    fn narration(
        &self,
        event: &ActivityEvent,
        text: String,
        method: SummarizationMethod,
    ) -> NarrationEvent {
        NarrationEvent {
            text,
            priority: NarrationPriority::Normal,
            source_event_type: event.kind(),
            source_event_id: event.event_id.clone(),
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            block_reason: None,
            summarization_method: method,
            options: None,
        }
    }

    /// Probe the endpoint's model listing to decide availability.
    async fn check_health(&self) {
        *self.last_health_check.lock() = Instant::now();
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(base_url = %self.base_url, model = %self.model, "LLM summarizer available");
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(status = %resp.status(), "LLM endpoint unhealthy — using truncation fallback");
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(base_url = %self.base_url, "LLM endpoint not reachable — using truncation fallback: {e}");
            }
        }
    }

    /// Re-probe when unavailable and the recheck interval has elapsed.
    async fn maybe_recheck_health(&self) {
        if self.is_available() {
            return;
        }
        let due = self.last_health_check.lock().elapsed() >= self.recheck_interval;
        if due {
            self.check_health().await;
        }
    }
}

/// Truncation fallback: short texts pass through, long ones keep the
/// first 990 chars (right-trimmed) plus an ellipsis.
fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_TRUNCATION_LENGTH {
        return text.to_string();
    }
    let head: String = text.chars().take(TRUNCATED_LENGTH).collect();
    format!("{}...", head.trim_end())
}
