//! Event types flowing on the Herald buses.
//!
//! ## Buses
//!
//! | Event | Bus |
//! |-------|-----|
//! | `ActivityEvent` | activity bus (S1 → S2, S4, alerts) |
//! | `NarrationEvent` | narration bus (S2 → S3) |
//! | `ResponseEvent` | response bus (S4 → diagnostics) |
//!
//! The wire shape is flat JSON with a `type` discriminator so that hook
//! payload fields survive a parse → serialize round trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Wall-clock seconds since the Unix epoch, as carried on every event.
pub fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

/// Which ingestion adapter produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Hook,
    Transcript,
}

/// Why the assistant is blocked and waiting for a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    PermissionPrompt,
    IdlePrompt,
    Question,
}

/// Discriminator for the activity payload, usable as a bare tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ToolExecuted,
    AgentBlocked,
    AgentStopped,
    AgentMessage,
    SessionStart,
    SessionEnd,
}

impl ActivityKind {
    /// Wire name of the kind (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::ToolExecuted => "tool_executed",
            ActivityKind::AgentBlocked => "agent_blocked",
            ActivityKind::AgentStopped => "agent_stopped",
            ActivityKind::AgentMessage => "agent_message",
            ActivityKind::SessionStart => "session_start",
            ActivityKind::SessionEnd => "session_end",
        }
    }
}

/// Type-discriminated payload of an [`ActivityEvent`].
///
/// Unused fields of a variant are absent on the wire rather than null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    ToolExecuted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<serde_json::Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_output: Option<Value>,
    },
    AgentBlocked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_reason: Option<BlockReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<Vec<String>>,
    },
    AgentStopped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },
    AgentMessage {
        text: String,
    },
    SessionStart,
    SessionEnd,
}

impl ActivityPayload {
    pub fn kind(&self) -> ActivityKind {
        match self {
            ActivityPayload::ToolExecuted { .. } => ActivityKind::ToolExecuted,
            ActivityPayload::AgentBlocked { .. } => ActivityKind::AgentBlocked,
            ActivityPayload::AgentStopped { .. } => ActivityKind::AgentStopped,
            ActivityPayload::AgentMessage { .. } => ActivityKind::AgentMessage,
            ActivityPayload::SessionStart => ActivityKind::SessionStart,
            ActivityPayload::SessionEnd => ActivityKind::SessionEnd,
        }
    }
}

/// The canonical unit flowing on the activity bus.
///
/// Events are immutable after emission; each subscriber receives its own
/// clone and no references leak back to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: String,
    pub timestamp: f64,
    pub session_id: String,
    pub source: EventSource,
    #[serde(flatten)]
    pub payload: ActivityPayload,
}

impl ActivityEvent {
    /// Build a new event stamped with a fresh id and the current time.
    pub fn new(session_id: impl Into<String>, source: EventSource, payload: ActivityPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: now_ts(),
            session_id: session_id.into(),
            source,
            payload,
        }
    }

    /// Same as [`ActivityEvent::new`] with a caller-supplied timestamp.
    pub fn with_timestamp(
        session_id: impl Into<String>,
        source: EventSource,
        payload: ActivityPayload,
        timestamp: f64,
    ) -> Self {
        Self {
            timestamp,
            ..Self::new(session_id, source, payload)
        }
    }

    pub fn kind(&self) -> ActivityKind {
        self.payload.kind()
    }

    pub fn is_blocked(&self) -> bool {
        self.kind() == ActivityKind::AgentBlocked
    }

    /// The options list carried by a blocked event, if any.
    pub fn options(&self) -> Option<&[String]> {
        match &self.payload {
            ActivityPayload::AgentBlocked { options, .. } => options.as_deref(),
            _ => None,
        }
    }

    /// The block reason carried by a blocked event, if any.
    pub fn block_reason(&self) -> Option<BlockReason> {
        match &self.payload {
            ActivityPayload::AgentBlocked { block_reason, .. } => *block_reason,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Narration events
// ---------------------------------------------------------------------------

/// Playback urgency of a narration. Ordering follows rank: critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationPriority {
    Critical,
    Normal,
    Low,
}

impl NarrationPriority {
    /// Integer rank used by the playback scheduler (0 = most urgent).
    pub fn rank(self) -> u8 {
        match self {
            NarrationPriority::Critical => 0,
            NarrationPriority::Normal => 1,
            NarrationPriority::Low => 2,
        }
    }
}

/// How a narration's text was produced (diagnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizationMethod {
    Template,
    Llm,
    Truncation,
}

/// The unit on the narration bus: one phrase to be spoken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationEvent {
    pub text: String,
    pub priority: NarrationPriority,
    pub source_event_type: ActivityKind,
    pub source_event_id: String,
    pub session_id: String,
    pub timestamp: f64,
    /// Carried only when `source_event_type` is `agent_blocked`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<BlockReason>,
    pub summarization_method: SummarizationMethod,
    /// Carried only for blocking narrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Response events
// ---------------------------------------------------------------------------

/// How a transcript was matched to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Ordinal,
    YesNo,
    Direct,
    Fuzzy,
    Verbatim,
}

/// Result of matching a transcript against the available options.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched_text: String,
    pub confidence: f32,
    pub method: MatchMethod,
}

/// Diagnostic emission when voice-in matches or dispatches a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    /// Matched option, or the verbatim transcript.
    pub text: String,
    /// Raw transcript as returned by the STT service.
    pub transcript: String,
    pub session_id: String,
    pub match_method: MatchMethod,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Subsystem states (health introspection)
// ---------------------------------------------------------------------------

/// Operational state of the voice-out subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthState {
    Active,
    Degraded,
    Disabled,
}

/// Operational state of the voice-in subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Active,
    Degraded,
    Disabled,
    Listening,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_executed_serializes_flat_with_type_tag() {
        let mut input = serde_json::Map::new();
        input.insert("file_path".into(), json!("/tmp/a.rs"));
        let event = ActivityEvent::new(
            "sess-1",
            EventSource::Hook,
            ActivityPayload::ToolExecuted {
                tool_name: Some("Edit".into()),
                tool_input: Some(input),
                tool_output: None,
            },
        );

        let value = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(value["type"], "tool_executed");
        assert_eq!(value["session_id"], "sess-1");
        assert_eq!(value["source"], "hook");
        assert_eq!(value["tool_name"], "Edit");
        assert_eq!(value["tool_input"]["file_path"], "/tmp/a.rs");
        assert!(value.get("tool_output").is_none());
        assert!(value.get("options").is_none());

        let round_trip: ActivityEvent =
            serde_json::from_value(value).expect("deserialize activity event");
        assert_eq!(round_trip.kind(), ActivityKind::ToolExecuted);
        assert_eq!(round_trip.event_id, event.event_id);
    }

    #[test]
    fn blocked_event_exposes_reason_and_options() {
        let event = ActivityEvent::new(
            "sess-2",
            EventSource::Hook,
            ActivityPayload::AgentBlocked {
                block_reason: Some(BlockReason::Question),
                message: Some("Which DB?".into()),
                options: Some(vec!["Postgres".into(), "MySQL".into()]),
            },
        );

        assert!(event.is_blocked());
        assert_eq!(event.block_reason(), Some(BlockReason::Question));
        assert_eq!(event.options().map(<[String]>::len), Some(2));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "agent_blocked");
        assert_eq!(value["block_reason"], "question");
    }

    #[test]
    fn session_markers_carry_no_payload_fields() {
        let event = ActivityEvent::new("sess-3", EventSource::Hook, ActivityPayload::SessionStart);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session_start");
        assert!(value.get("tool_name").is_none());
        assert!(value.get("text").is_none());
    }

    #[test]
    fn priority_ranks_are_ordered() {
        assert_eq!(NarrationPriority::Critical.rank(), 0);
        assert_eq!(NarrationPriority::Normal.rank(), 1);
        assert_eq!(NarrationPriority::Low.rank(), 2);
        assert!(NarrationPriority::Critical < NarrationPriority::Normal);
    }

    #[test]
    fn narration_event_round_trips() {
        let narration = NarrationEvent {
            text: "The agent has a question.".into(),
            priority: NarrationPriority::Critical,
            source_event_type: ActivityKind::AgentBlocked,
            source_event_id: "evt-1".into(),
            session_id: "sess-4".into(),
            timestamp: 1234.5,
            block_reason: Some(BlockReason::Question),
            summarization_method: SummarizationMethod::Template,
            options: Some(vec!["Yes".into(), "No".into()]),
        };

        let value = serde_json::to_value(&narration).unwrap();
        assert_eq!(value["priority"], "critical");
        assert_eq!(value["source_event_type"], "agent_blocked");
        assert_eq!(value["summarization_method"], "template");

        let round_trip: NarrationEvent = serde_json::from_value(value).unwrap();
        assert_eq!(round_trip.priority, NarrationPriority::Critical);
        assert_eq!(round_trip.options.as_deref().map(<[String]>::len), Some(2));
    }

    #[test]
    fn unrecognized_payload_fields_are_discarded() {
        let raw = json!({
            "event_id": "e-1",
            "timestamp": 1.0,
            "session_id": "s",
            "source": "hook",
            "type": "agent_stopped",
            "stop_reason": "done",
            "definitely_not_a_field": true,
        });
        let event: ActivityEvent = serde_json::from_value(raw).expect("tolerant parse");
        assert_eq!(event.kind(), ActivityKind::AgentStopped);
        let back = serde_json::to_value(&event).unwrap();
        assert!(back.get("definitely_not_a_field").is_none());
    }
}
