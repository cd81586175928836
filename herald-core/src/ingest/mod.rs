//! Stage 1: ingestion adapters.
//!
//! Two sources feed the activity bus: structured hook payloads posted by
//! the assistant's hook scripts, and the assistant's JSONL transcript
//! files watched on disk. Both translate into canonical
//! [`ActivityEvent`](crate::events::ActivityEvent)s; cross-source ordering
//! is best-effort, per-source ordering within a session is preserved.

pub mod hook;
pub mod transcript;

pub use hook::parse_hook_event;
pub use transcript::TranscriptWatcher;
