//! Parse raw assistant hook JSON into [`ActivityEvent`]s.
//!
//! Hook scripts forward a JSON object with a `hook_event_name`
//! discriminator. Recognized names map onto activity kinds; anything else
//! is rejected so the caller can answer "unrecognized".

use serde_json::Value;
use tracing::{debug, warn};

use crate::events::{ActivityEvent, ActivityPayload, BlockReason, EventSource};

const HOOK_POST_TOOL_USE: &str = "PostToolUse";
const HOOK_NOTIFICATION: &str = "Notification";
const HOOK_STOP: &str = "Stop";
const HOOK_SESSION_START: &str = "SessionStart";
const HOOK_SESSION_END: &str = "SessionEnd";

/// Convert a raw hook payload into an [`ActivityEvent`].
///
/// Returns `None` (with a warning) when the payload is not an object or
/// the hook event name is unrecognised. Malformed-but-parseable payloads
/// degrade field-by-field rather than failing the whole event.
pub fn parse_hook_event(raw: &Value) -> Option<ActivityEvent> {
    let obj = match raw.as_object() {
        Some(obj) => obj,
        None => {
            warn!("hook payload is not a JSON object — skipping");
            return None;
        }
    };

    let hook_event_name = obj
        .get("hook_event_name")
        .and_then(Value::as_str)
        .unwrap_or("");
    let session_id = obj
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    debug!(hook_event_name, session_id = %session_id, "parsing hook event");

    let payload = match hook_event_name {
        HOOK_POST_TOOL_USE => ActivityPayload::ToolExecuted {
            tool_name: str_field(obj, "tool_name"),
            tool_input: obj
                .get("tool_input")
                .and_then(Value::as_object)
                .cloned(),
            tool_output: obj.get("tool_response").cloned().filter(|v| !v.is_null()),
        },
        HOOK_NOTIFICATION => {
            let message = str_field(obj, "message");
            let notification_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
            ActivityPayload::AgentBlocked {
                block_reason: infer_block_reason(notification_type, message.as_deref()),
                message,
                options: string_list(obj.get("options")),
            }
        }
        HOOK_STOP => ActivityPayload::AgentStopped {
            stop_reason: str_field(obj, "stop_reason").or_else(|| str_field(obj, "reason")),
        },
        HOOK_SESSION_START => ActivityPayload::SessionStart,
        HOOK_SESSION_END => ActivityPayload::SessionEnd,
        other => {
            warn!(hook_event_name = other, "unrecognised hook event name — skipping");
            return None;
        }
    };

    Some(ActivityEvent::new(session_id, EventSource::Hook, payload))
}

/// Infer why the assistant is blocked.
///
/// The explicit `type` field wins; the message body is only scanned for
/// permission/idle wording as a fallback.
fn infer_block_reason(notification_type: &str, message: Option<&str>) -> Option<BlockReason> {
    let lowered = notification_type.to_lowercase();
    if lowered.contains("permission") {
        return Some(BlockReason::PermissionPrompt);
    }
    if lowered.contains("idle") {
        return Some(BlockReason::IdlePrompt);
    }
    if lowered.contains("question") {
        return Some(BlockReason::Question);
    }

    if let Some(message) = message {
        let msg_lower = message.to_lowercase();
        if msg_lower.contains("permission") {
            return Some(BlockReason::PermissionPrompt);
        }
        if msg_lower.contains("idle") {
            return Some(BlockReason::IdlePrompt);
        }
    }

    debug!(
        notification_type,
        "could not determine block reason from notification"
    );
    None
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    let list: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}
