//! # herald-core
//!
//! Pipeline engine for the Herald narration sidecar.
//!
//! ## Architecture
//!
//! ```text
//! hook payloads ─┐
//!                ├─► EventBus<ActivityEvent> ─► Summarizer ─► EventBus<NarrationEvent>
//! transcript ────┘          │    │                                   │
//! watcher                   │    └────────► ListenEngine         SpeechEngine
//!                           └─────────────► AlertManager      (tone + TTS + player)
//!                                                │                   │
//!                                         clear_alert ◄── dispatch   └─► critical_complete
//! ```
//!
//! Ingestion adapters translate the assistant's hook payloads and
//! transcript files into activity events. The summarizer batches and
//! renders them into narrations; the speech engine schedules playback by
//! priority with preemption; the listen engine captures a spoken reply
//! while the session is blocked and injects it back into the assistant's
//! terminal. Buses isolate slow consumers; blocking device and HTTP work
//! runs on worker threads and rejoins through signals.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod ingest;
pub mod resample;
pub mod signal;
pub mod summarize;
pub mod voice_in;
pub mod voice_out;

// Convenience re-exports for downstream crates
pub use bus::{EventBus, Subscription};
pub use config::{Config, SAMPLE_RATE};
pub use error::{HeraldError, Result};
pub use events::{
    ActivityEvent, ActivityKind, ActivityPayload, BlockReason, EventSource, ListenState,
    MatchMethod, MatchResult, NarrationEvent, NarrationPriority, ResponseEvent,
    SummarizationMethod, SynthState,
};
pub use ingest::{parse_hook_event, TranscriptWatcher};
pub use signal::ResetSignal;
pub use summarize::Summarizer;
pub use voice_in::ListenEngine;
pub use voice_out::SpeechEngine;
