//! Stage 2: convert activity events into narrations.
//!
//! One sequential worker consumes the activity bus and routes each event:
//!
//! | Activity kind | Handler | Priority |
//! |---------------|---------|----------|
//! | `tool_executed` | batcher → batch template | normal |
//! | `agent_message` | LLM summarizer (truncation fallback) | normal |
//! | `agent_blocked` | template | critical |
//! | `agent_stopped` | template | normal |
//! | `session_start` / `session_end` | template | low |
//!
//! Any pending tool batch is flushed before a non-tool event is handled,
//! so narration order follows event order within a session.

pub mod batcher;
pub mod llm;
pub mod template;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::config::Config;
use crate::error::{HeraldError, Result};
use crate::events::{ActivityEvent, ActivityKind, NarrationEvent};

use batcher::EventBatcher;
use llm::LlmSummarizer;
use template::TemplateEngine;

pub struct Summarizer {
    activity_bus: EventBus<ActivityEvent>,
    narration_bus: EventBus<NarrationEvent>,
    template: Arc<TemplateEngine>,
    llm: Arc<LlmSummarizer>,
    batcher: Arc<EventBatcher>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Summarizer {
    pub fn new(
        config: &Config,
        activity_bus: EventBus<ActivityEvent>,
        narration_bus: EventBus<NarrationEvent>,
    ) -> Result<Self> {
        let template = Arc::new(TemplateEngine::new());
        let batcher = Arc::new(EventBatcher::new(
            config.batch_window,
            config.max_batch_size,
            Arc::clone(&template),
            narration_bus.clone(),
        ));
        Ok(Self {
            activity_bus,
            narration_bus,
            template,
            llm: Arc::new(LlmSummarizer::new(config)?),
            batcher,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Probe the LLM, subscribe to the activity bus and start the worker.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::AlreadyRunning);
        }
        self.llm.start().await;

        let mut subscription = self.activity_bus.subscribe();
        let running = Arc::clone(&self.running);
        let worker = Worker {
            narration_bus: self.narration_bus.clone(),
            template: Arc::clone(&self.template),
            llm: Arc::clone(&self.llm),
            batcher: Arc::clone(&self.batcher),
        };

        *self.task.lock() = Some(tokio::spawn(async move {
            debug!("summarizer worker started");
            while running.load(Ordering::Relaxed) {
                match subscription.recv().await {
                    Some(event) => worker.process_event(event).await,
                    None => break,
                }
            }
            debug!("summarizer worker stopped");
        }));

        info!("summarizer started");
        Ok(())
    }

    /// Stop the worker and flush any pending batch so no event is lost.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if let Some(narration) = self.batcher.flush() {
            self.narration_bus.emit(narration);
        }
        info!("summarizer stopped");
    }

    /// Whether the generative endpoint is currently reachable.
    pub fn llm_available(&self) -> bool {
        self.llm.is_available()
    }
}

/// The per-event routing logic, owned by the worker task.
struct Worker {
    narration_bus: EventBus<NarrationEvent>,
    template: Arc<TemplateEngine>,
    llm: Arc<LlmSummarizer>,
    batcher: Arc<EventBatcher>,
}

impl Worker {
    async fn process_event(&self, event: ActivityEvent) {
        debug!(kind = event.kind().as_str(), session_id = %event.session_id, "processing event");
        match event.kind() {
            ActivityKind::ToolExecuted => {
                if let Some(narration) = self.batcher.add(event) {
                    self.emit(narration);
                }
            }
            ActivityKind::AgentMessage => {
                self.flush_batcher();
                let narration = self.llm.summarize(&event).await;
                self.emit(narration);
            }
            // agent_blocked is critical and the remaining kinds are plain
            // templates; both flush the batch first so tool narrations are
            // not reordered behind them.
            _ => {
                self.flush_batcher();
                self.emit(self.template.render(&event));
            }
        }
    }

    fn flush_batcher(&self) {
        if let Some(narration) = self.batcher.flush() {
            self.emit(narration);
        }
    }

    fn emit(&self, narration: NarrationEvent) {
        info!(
            priority = ?narration.priority,
            text = %narration.text.chars().take(80).collect::<String>(),
            "narration emitted"
        );
        self.narration_bus.emit(narration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{
        ActivityKind, ActivityPayload, BlockReason, EventSource, NarrationPriority,
        SummarizationMethod,
    };
    use serde_json::json;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            batch_window: Duration::from_millis(40),
            // Nothing listens here: the LLM probe fails fast and the
            // summarizer stays on the truncation path.
            llm_base_url: "http://127.0.0.1:1".into(),
            ..Config::default()
        }
    }

    fn tool_event(tool: &str, path: &str) -> ActivityEvent {
        ActivityEvent::new(
            "sess-a",
            EventSource::Hook,
            ActivityPayload::ToolExecuted {
                tool_name: Some(tool.into()),
                tool_input: json!({"file_path": path}).as_object().cloned(),
                tool_output: None,
            },
        )
    }

    async fn recv_narration(
        sub: &mut crate::bus::Subscription<NarrationEvent>,
    ) -> NarrationEvent {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("narration within timeout")
            .expect("bus open")
    }

    #[tokio::test]
    async fn batches_rapid_tool_events_into_one_narration() {
        let activity: EventBus<ActivityEvent> = EventBus::new(16);
        let narrations: EventBus<NarrationEvent> = EventBus::new(16);
        let mut sub = narrations.subscribe();

        let summarizer =
            Summarizer::new(&test_config(), activity.clone(), narrations.clone()).unwrap();
        summarizer.start().await.unwrap();

        activity.emit(tool_event("Edit", "a.py"));
        activity.emit(tool_event("Edit", "b.py"));
        activity.emit(tool_event("Edit", "c.py"));

        let narration = recv_narration(&mut sub).await;
        assert_eq!(narration.text, "Edited 3 files.");
        assert_eq!(narration.priority, NarrationPriority::Normal);
        assert_eq!(narration.summarization_method, SummarizationMethod::Template);

        summarizer.stop().await;
    }

    #[tokio::test]
    async fn blocked_event_flushes_batch_then_goes_critical() {
        let activity: EventBus<ActivityEvent> = EventBus::new(16);
        let narrations: EventBus<NarrationEvent> = EventBus::new(16);
        let mut sub = narrations.subscribe();

        let summarizer =
            Summarizer::new(&test_config(), activity.clone(), narrations.clone()).unwrap();
        summarizer.start().await.unwrap();

        activity.emit(tool_event("Edit", "a.py"));
        activity.emit(tool_event("Edit", "b.py"));
        activity.emit(ActivityEvent::new(
            "sess-a",
            EventSource::Hook,
            ActivityPayload::AgentBlocked {
                block_reason: Some(BlockReason::Question),
                message: Some("Which DB?".into()),
                options: Some(vec!["Postgres".into(), "MySQL".into()]),
            },
        ));

        let first = recv_narration(&mut sub).await;
        assert_eq!(first.text, "Edited 2 files.");

        let second = recv_narration(&mut sub).await;
        assert_eq!(second.priority, NarrationPriority::Critical);
        assert_eq!(second.source_event_type, ActivityKind::AgentBlocked);
        assert_eq!(
            second.text,
            "The agent has a question. Which DB? Options are: Postgres and MySQL."
        );
        assert_eq!(second.options.as_deref().map(<[String]>::len), Some(2));

        summarizer.stop().await;
    }

    #[tokio::test]
    async fn agent_message_falls_back_to_truncation_when_llm_down() {
        let activity: EventBus<ActivityEvent> = EventBus::new(16);
        let narrations: EventBus<NarrationEvent> = EventBus::new(16);
        let mut sub = narrations.subscribe();

        let summarizer =
            Summarizer::new(&test_config(), activity.clone(), narrations.clone()).unwrap();
        assert!(!summarizer.llm_available());
        summarizer.start().await.unwrap();
        assert!(!summarizer.llm_available());

        activity.emit(ActivityEvent::new(
            "sess-a",
            EventSource::Transcript,
            ActivityPayload::AgentMessage {
                text: "z".repeat(2000),
            },
        ));

        let narration = recv_narration(&mut sub).await;
        assert_eq!(narration.summarization_method, SummarizationMethod::Truncation);
        assert_eq!(narration.text.chars().count(), 993);

        summarizer.stop().await;
    }

    #[tokio::test]
    async fn stop_flushes_pending_batch() {
        let activity: EventBus<ActivityEvent> = EventBus::new(16);
        let narrations: EventBus<NarrationEvent> = EventBus::new(16);
        let mut sub = narrations.subscribe();

        let config = Config {
            batch_window: Duration::from_secs(30),
            ..test_config()
        };
        let summarizer = Summarizer::new(&config, activity.clone(), narrations.clone()).unwrap();
        summarizer.start().await.unwrap();

        activity.emit(tool_event("Write", "new.rs"));
        // Give the worker a beat to pull the event into the batch.
        tokio::time::sleep(Duration::from_millis(50)).await;
        summarizer.stop().await;

        let narration = recv_narration(&mut sub).await;
        assert_eq!(narration.text, "Created a file.");
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let activity: EventBus<ActivityEvent> = EventBus::new(16);
        let narrations: EventBus<NarrationEvent> = EventBus::new(16);
        let summarizer =
            Summarizer::new(&test_config(), activity.clone(), narrations.clone()).unwrap();
        summarizer.start().await.unwrap();
        assert!(matches!(
            summarizer.start().await,
            Err(HeraldError::AlreadyRunning)
        ));
        summarizer.stop().await;
    }
}
