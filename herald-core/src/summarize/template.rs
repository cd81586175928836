//! Deterministic event-to-narration-text mapper.
//!
//! Handles every activity kind except `agent_message` (which goes through
//! the LLM summarizer) by filling fixed templates with event data. The
//! renderer is total: equal events produce equal text, and no input can
//! make it fail — anything unexpected degrades to a safe generic phrase.

use tracing::debug;

use crate::events::{
    ActivityEvent, ActivityKind, ActivityPayload, BlockReason, NarrationEvent, NarrationPriority,
    SummarizationMethod,
};

/// Maximum length for command text inside a narration.
const BASH_CMD_MAX_LEN: usize = 60;

/// Narration text used when rendering hits an unexpected shape.
const SAFE_FALLBACK: &str = "An event occurred.";

/// Deterministic template renderer for activity events.
#[derive(Debug, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Convert a single event into a narration.
    pub fn render(&self, event: &ActivityEvent) -> NarrationEvent {
        let text = render_text(event);
        NarrationEvent {
            text: text.trim().to_string(),
            priority: priority_for(event.kind()),
            source_event_type: event.kind(),
            source_event_id: event.event_id.clone(),
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            block_reason: event.block_reason(),
            summarization_method: SummarizationMethod::Template,
            options: event.options().map(<[String]>::to_vec),
        }
    }

    /// Convert a batch of `tool_executed` events into one narration.
    ///
    /// Counts events per tool and joins per-tool phrases with " and ":
    /// "Edited 3 files.", "Edited 2 files and Ran a command.".
    pub fn render_batch(&self, events: &[ActivityEvent]) -> Option<NarrationEvent> {
        let first = events.first()?;

        // Count per tool, preserving first-seen order.
        let mut counts: Vec<(String, usize)> = Vec::new();
        for event in events {
            let tool = match &event.payload {
                ActivityPayload::ToolExecuted { tool_name, .. } => {
                    tool_name.clone().unwrap_or_else(|| "Unknown".into())
                }
                _ => "Unknown".into(),
            };
            match counts.iter_mut().find(|(name, _)| *name == tool) {
                Some((_, count)) => *count += 1,
                None => counts.push((tool, 1)),
            }
        }

        let parts: Vec<String> = counts
            .iter()
            .map(|(tool, count)| {
                let verb = batch_verb(tool);
                let noun = batch_noun(tool, *count);
                if *count > 1 {
                    format!("{verb} {count} {noun}")
                } else {
                    format!("{verb} {noun}")
                }
            })
            .collect();
        let text = format!("{}.", parts.join(" and "));

        debug!(events = events.len(), text = %text, "rendered batch narration");

        Some(NarrationEvent {
            text,
            priority: NarrationPriority::Normal,
            source_event_type: ActivityKind::ToolExecuted,
            source_event_id: first.event_id.clone(),
            session_id: first.session_id.clone(),
            timestamp: first.timestamp,
            block_reason: None,
            summarization_method: SummarizationMethod::Template,
            options: None,
        })
    }
}

fn priority_for(kind: ActivityKind) -> NarrationPriority {
    match kind {
        ActivityKind::AgentBlocked => NarrationPriority::Critical,
        ActivityKind::ToolExecuted
        | ActivityKind::AgentMessage
        | ActivityKind::AgentStopped => NarrationPriority::Normal,
        ActivityKind::SessionStart | ActivityKind::SessionEnd => NarrationPriority::Low,
    }
}

fn render_text(event: &ActivityEvent) -> String {
    match &event.payload {
        ActivityPayload::ToolExecuted {
            tool_name,
            tool_input,
            ..
        } => render_tool_executed(tool_name.as_deref(), tool_input.as_ref()),
        ActivityPayload::AgentBlocked {
            block_reason,
            message,
            options,
        } => render_agent_blocked(*block_reason, message.as_deref(), options.as_deref()),
        ActivityPayload::AgentStopped { stop_reason } => match stop_reason {
            Some(reason) if !reason.trim().is_empty() => format!("Agent stopped: {reason}."),
            _ => "Agent finished.".into(),
        },
        ActivityPayload::SessionStart => "New coding session started.".into(),
        ActivityPayload::SessionEnd => "Session ended.".into(),
        // agent_message is routed to the LLM summarizer; rendering one here
        // means a routing slip upstream, so fall back to something safe.
        ActivityPayload::AgentMessage { .. } => SAFE_FALLBACK.into(),
    }
}

fn render_tool_executed(
    tool_name: Option<&str>,
    tool_input: Option<&serde_json::Map<String, serde_json::Value>>,
) -> String {
    let input_str = |key: &str, fallback: &str| -> String {
        tool_input
            .and_then(|input| input.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    match tool_name.unwrap_or("Unknown") {
        "Bash" => {
            let mut command = input_str("command", "");
            if command.chars().count() > BASH_CMD_MAX_LEN {
                command = command.chars().take(BASH_CMD_MAX_LEN).collect::<String>() + "...";
            }
            format!("Ran command: {command}")
        }
        "Read" => format!("Read {}", basename(&input_str("file_path", "a file"))),
        "Edit" => format!("Edited {}", basename(&input_str("file_path", "a file"))),
        "Write" => format!("Created {}", basename(&input_str("file_path", "a file"))),
        "Glob" => format!(
            "Searched for files matching {}",
            input_str("pattern", "a pattern")
        ),
        "Grep" => format!("Searched code for {}", input_str("pattern", "a pattern")),
        "Task" => "Launched a sub-agent".into(),
        "WebFetch" => "Fetched a web page".into(),
        "WebSearch" => format!("Searched the web for {}", input_str("query", "something")),
        other => format!("Used {other} tool"),
    }
}

fn render_agent_blocked(
    reason: Option<BlockReason>,
    message: Option<&str>,
    options: Option<&[String]>,
) -> String {
    let mut base = match reason {
        Some(BlockReason::PermissionPrompt) => match message {
            Some(msg) => format!("The agent needs permission. {msg}"),
            None => "The agent needs permission.".into(),
        },
        Some(BlockReason::IdlePrompt) => "The agent is waiting for your input.".into(),
        Some(BlockReason::Question) => match message {
            Some(msg) => format!("The agent has a question. {msg}"),
            None => "The agent has a question.".into(),
        },
        None => "The agent is blocked and needs attention.".into(),
    };

    if let Some(options) = options {
        if !options.is_empty() {
            base.push(' ');
            base.push_str(&format_options(options));
        }
    }
    base
}

/// Natural-language rendering of an options list.
///
/// 1 item: "Options are: foo.". 2 items: "Options are: foo and bar.".
/// 3+: Oxford comma with "or" before the last item.
fn format_options(options: &[String]) -> String {
    match options {
        [only] => format!("Options are: {only}."),
        [first, second] => format!("Options are: {first} and {second}."),
        _ => {
            let head = options[..options.len() - 1].join(", ");
            format!("Options are: {head}, or {}.", options[options.len() - 1])
        }
    }
}

/// Just the filename from a full path, for listenability.
fn basename(file_path: &str) -> String {
    if file_path.is_empty() || file_path == "a file" {
        return "a file".into();
    }
    file_path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(file_path)
        .to_string()
}

fn batch_verb(tool_name: &str) -> &'static str {
    match tool_name {
        "Edit" => "Edited",
        "Read" => "Read",
        "Write" => "Created",
        "Bash" => "Ran",
        "Glob" | "Grep" => "Searched",
        _ => "Used",
    }
}

fn batch_noun(tool_name: &str, count: usize) -> &'static str {
    match tool_name {
        "Edit" | "Read" | "Write" => {
            if count > 1 {
                "files"
            } else {
                "a file"
            }
        }
        "Bash" => {
            if count > 1 {
                "commands"
            } else {
                "a command"
            }
        }
        "Glob" | "Grep" => {
            if count > 1 {
                "searches"
            } else {
                "a search"
            }
        }
        _ => {
            if count > 1 {
                "tools"
            } else {
                "a tool"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSource;
    use serde_json::json;

    fn tool_event(tool: &str, input: serde_json::Value) -> ActivityEvent {
        ActivityEvent::new(
            "sess",
            EventSource::Hook,
            ActivityPayload::ToolExecuted {
                tool_name: Some(tool.into()),
                tool_input: input.as_object().cloned(),
                tool_output: None,
            },
        )
    }

    fn blocked_event(
        reason: Option<BlockReason>,
        message: Option<&str>,
        options: Option<Vec<&str>>,
    ) -> ActivityEvent {
        ActivityEvent::new(
            "sess",
            EventSource::Hook,
            ActivityPayload::AgentBlocked {
                block_reason: reason,
                message: message.map(str::to_string),
                options: options.map(|o| o.into_iter().map(str::to_string).collect()),
            },
        )
    }

    #[test]
    fn bash_command_is_truncated_at_sixty_chars() {
        let engine = TemplateEngine::new();
        let long = "x".repeat(100);
        let narration = engine.render(&tool_event("Bash", json!({"command": long})));
        assert_eq!(narration.text, format!("Ran command: {}...", "x".repeat(60)));
        assert_eq!(narration.priority, NarrationPriority::Normal);

        let short = engine.render(&tool_event("Bash", json!({"command": "cargo fmt"})));
        assert_eq!(short.text, "Ran command: cargo fmt");
    }

    #[test]
    fn file_tools_use_basenames() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine
                .render(&tool_event("Read", json!({"file_path": "/src/deep/main.rs"})))
                .text,
            "Read main.rs"
        );
        assert_eq!(
            engine
                .render(&tool_event("Edit", json!({"file_path": "lib.rs"})))
                .text,
            "Edited lib.rs"
        );
        assert_eq!(
            engine.render(&tool_event("Write", json!({}))).text,
            "Created a file"
        );
    }

    #[test]
    fn search_and_misc_tools_render_their_phrases() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine
                .render(&tool_event("Glob", json!({"pattern": "**/*.rs"})))
                .text,
            "Searched for files matching **/*.rs"
        );
        assert_eq!(
            engine
                .render(&tool_event("Grep", json!({"pattern": "unwrap"})))
                .text,
            "Searched code for unwrap"
        );
        assert_eq!(
            engine.render(&tool_event("Task", json!({}))).text,
            "Launched a sub-agent"
        );
        assert_eq!(
            engine.render(&tool_event("WebFetch", json!({}))).text,
            "Fetched a web page"
        );
        assert_eq!(
            engine
                .render(&tool_event("WebSearch", json!({"query": "rust sse"})))
                .text,
            "Searched the web for rust sse"
        );
        assert_eq!(
            engine.render(&tool_event("MysteryTool", json!({}))).text,
            "Used MysteryTool tool"
        );
    }

    #[test]
    fn blocked_templates_per_reason() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine
                .render(&blocked_event(Some(BlockReason::PermissionPrompt), None, None))
                .text,
            "The agent needs permission."
        );
        assert_eq!(
            engine
                .render(&blocked_event(
                    Some(BlockReason::PermissionPrompt),
                    Some("Run tests?"),
                    None
                ))
                .text,
            "The agent needs permission. Run tests?"
        );
        assert_eq!(
            engine
                .render(&blocked_event(Some(BlockReason::IdlePrompt), Some("ignored"), None))
                .text,
            "The agent is waiting for your input."
        );
        assert_eq!(
            engine
                .render(&blocked_event(Some(BlockReason::Question), Some("Which DB?"), None))
                .text,
            "The agent has a question. Which DB?"
        );
        assert_eq!(
            engine.render(&blocked_event(None, None, None)).text,
            "The agent is blocked and needs attention."
        );
    }

    #[test]
    fn options_list_grammar() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine
                .render(&blocked_event(Some(BlockReason::Question), None, Some(vec!["A"])))
                .text,
            "The agent has a question. Options are: A."
        );
        assert_eq!(
            engine
                .render(&blocked_event(
                    Some(BlockReason::Question),
                    Some("Which DB?"),
                    Some(vec!["Postgres", "MySQL"])
                ))
                .text,
            "The agent has a question. Which DB? Options are: Postgres and MySQL."
        );
        assert_eq!(
            engine
                .render(&blocked_event(
                    Some(BlockReason::Question),
                    None,
                    Some(vec!["A", "B", "C"])
                ))
                .text,
            "The agent has a question. Options are: A, B, or C."
        );
    }

    #[test]
    fn blocked_narration_carries_reason_and_options() {
        let engine = TemplateEngine::new();
        let narration = engine.render(&blocked_event(
            Some(BlockReason::Question),
            None,
            Some(vec!["Yes", "No"]),
        ));
        assert_eq!(narration.priority, NarrationPriority::Critical);
        assert_eq!(narration.block_reason, Some(BlockReason::Question));
        assert_eq!(narration.options.as_deref().map(<[String]>::len), Some(2));
    }

    #[test]
    fn stopped_and_session_templates() {
        let engine = TemplateEngine::new();
        let stopped = ActivityEvent::new(
            "sess",
            EventSource::Hook,
            ActivityPayload::AgentStopped {
                stop_reason: Some("user interrupt".into()),
            },
        );
        assert_eq!(engine.render(&stopped).text, "Agent stopped: user interrupt.");

        let finished = ActivityEvent::new(
            "sess",
            EventSource::Hook,
            ActivityPayload::AgentStopped { stop_reason: None },
        );
        assert_eq!(engine.render(&finished).text, "Agent finished.");

        let start =
            ActivityEvent::new("sess", EventSource::Hook, ActivityPayload::SessionStart);
        let narration = engine.render(&start);
        assert_eq!(narration.text, "New coding session started.");
        assert_eq!(narration.priority, NarrationPriority::Low);

        let end = ActivityEvent::new("sess", EventSource::Hook, ActivityPayload::SessionEnd);
        assert_eq!(engine.render(&end).text, "Session ended.");
    }

    #[test]
    fn render_is_deterministic() {
        let engine = TemplateEngine::new();
        let event = tool_event("Bash", json!({"command": "cargo test"}));
        assert_eq!(engine.render(&event).text, engine.render(&event).text);
    }

    #[test]
    fn batch_single_tool_counts_events() {
        let engine = TemplateEngine::new();
        let events: Vec<ActivityEvent> = (0..3)
            .map(|i| tool_event("Edit", json!({"file_path": format!("{i}.py")})))
            .collect();
        let narration = engine.render_batch(&events).expect("narration");
        assert_eq!(narration.text, "Edited 3 files.");
        assert_eq!(narration.priority, NarrationPriority::Normal);
        assert_eq!(narration.source_event_id, events[0].event_id);
        assert_eq!(narration.session_id, events[0].session_id);
    }

    #[test]
    fn batch_mixed_tools_join_with_and() {
        let engine = TemplateEngine::new();
        let events = vec![
            tool_event("Edit", json!({"file_path": "a.rs"})),
            tool_event("Edit", json!({"file_path": "b.rs"})),
            tool_event("Bash", json!({"command": "cargo check"})),
        ];
        let narration = engine.render_batch(&events).unwrap();
        assert_eq!(narration.text, "Edited 2 files and Ran a command.");
    }

    #[test]
    fn batch_unknown_tools_and_empty_batch() {
        let engine = TemplateEngine::new();
        let events = vec![
            tool_event("Custom", json!({})),
            tool_event("Custom", json!({})),
        ];
        assert_eq!(engine.render_batch(&events).unwrap().text, "Used 2 tools.");
        assert!(engine.render_batch(&[]).is_none());
    }
}
