//! Watch assistant JSONL transcript files for new assistant messages.
//!
//! The assistant stores conversation transcripts as one JSONL file per
//! session under a projects directory. This watcher tails those files:
//! it keeps a byte offset per path, reads only the appended region on
//! modification, and emits an `agent_message` activity event for every
//! new assistant text entry. Hooks deliver structured tool events; the
//! transcript gives us the assistant's natural-language messages.
//!
//! Watcher callbacks run on the notify backend thread. Bus emission is
//! synchronous and non-blocking, so no executor hand-off is needed.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::error::Result;
use crate::events::{now_ts, ActivityEvent, ActivityPayload, EventSource};

/// How long a deduplication key stays valid.
const DEDUP_TTL: Duration = Duration::from_secs(1);

/// Run dedup-cache cleanup every N events processed.
const DEDUP_CLEANUP_INTERVAL: u64 = 50;

/// Tails `*.jsonl` transcript files and emits `agent_message` events.
pub struct TranscriptWatcher {
    root: PathBuf,
    tail: Arc<Mutex<TailState>>,
    bus: EventBus<ActivityEvent>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl TranscriptWatcher {
    pub fn new(root: PathBuf, bus: EventBus<ActivityEvent>) -> Self {
        Self {
            root,
            tail: Arc::new(Mutex::new(TailState::default())),
            bus,
            watcher: Mutex::new(None),
        }
    }

    /// Start watching the root recursively.
    ///
    /// A missing or non-directory root logs a warning and leaves the
    /// watcher stopped; it is not an error.
    pub fn start(&self) -> Result<()> {
        if !self.root.is_dir() {
            warn!(
                root = %self.root.display(),
                "transcript root does not exist — watcher will not start"
            );
            return Ok(());
        }

        let tail = Arc::clone(&self.tail);
        let bus = self.bus.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => handle_fs_event(&tail, &bus, event),
                Err(e) => warn!("transcript watch error: {e}"),
            })
            .map_err(|e| anyhow::anyhow!("failed to create transcript watcher: {e}"))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| anyhow::anyhow!("failed to watch {}: {e}", self.root.display()))?;

        *self.watcher.lock() = Some(watcher);
        info!(root = %self.root.display(), "transcript watcher started");
        Ok(())
    }

    /// Stop watching and drop the backend.
    pub fn stop(&self) {
        if self.watcher.lock().take().is_some() {
            info!("transcript watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

fn handle_fs_event(
    tail: &Arc<Mutex<TailState>>,
    bus: &EventBus<ActivityEvent>,
    event: notify::Event,
) {
    use notify::EventKind;

    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        match event.kind {
            EventKind::Create(_) => {
                info!(path = %path.display(), "new transcript file discovered");
                tail.lock().process_file(path, bus);
            }
            EventKind::Modify(_) | EventKind::Any => {
                tail.lock().process_file(path, bus);
            }
            EventKind::Remove(_) => {
                tail.lock().forget(path);
            }
            _ => {}
        }
    }
}

/// Per-path offsets and the dedup window; the watcher's mutable core,
/// kept separate so tests can drive it without a filesystem watcher.
#[derive(Default)]
struct TailState {
    /// Absolute path → byte offset of the last-read position.
    offsets: HashMap<PathBuf, u64>,
    /// Dedup key → insertion timestamp (epoch seconds).
    seen: HashMap<String, f64>,
    events_processed: u64,
}

impl TailState {
    /// Read new lines from `path` and emit qualifying entries.
    fn process_file(&mut self, path: &Path, bus: &EventBus<ActivityEvent>) {
        let file_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path.display(), "cannot stat transcript file: {e}");
                return;
            }
        };

        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if file_size < offset {
            debug!(
                path = %path.display(),
                file_size,
                offset,
                "transcript file truncated — resetting offset"
            );
            offset = 0;
        }
        if file_size == offset {
            return;
        }

        let new_data = match read_from(path, offset) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), "error reading transcript file: {e}");
                return;
            }
        };

        self.offsets
            .insert(path.to_path_buf(), offset + new_data.len() as u64);

        for raw_line in new_data.lines() {
            let raw_line = raw_line.trim();
            if raw_line.is_empty() {
                continue;
            }
            self.handle_line(raw_line, path, bus);
        }
    }

    /// Drop offset tracking for a deleted file.
    fn forget(&mut self, path: &Path) {
        if self.offsets.remove(path).is_some() {
            debug!(path = %path.display(), "removed offset for deleted transcript file");
        }
    }

    fn handle_line(&mut self, raw_line: &str, path: &Path, bus: &EventBus<ActivityEvent>) {
        let entry: serde_json::Value = match serde_json::from_str(raw_line) {
            Ok(value) => value,
            Err(e) => {
                let head: String = raw_line.chars().take(80).collect();
                warn!(path = %path.display(), head = %head, "malformed transcript line: {e}");
                return;
            }
        };
        if !entry.is_object() {
            return;
        }

        let text = match extract_assistant_text(&entry) {
            Some(text) => text,
            None => return,
        };
        let session_id = extract_session_id(&entry, path);
        let timestamp = extract_timestamp(&entry);

        let key = dedup_key(&session_id, timestamp);
        let now = now_ts();
        if self.seen.contains_key(&key) {
            debug!(session_id = %session_id, "duplicate transcript event suppressed");
            return;
        }
        self.seen.insert(key, now);
        self.events_processed += 1;
        if self.events_processed % DEDUP_CLEANUP_INTERVAL == 0 {
            self.cleanup_dedup(now);
        }

        debug!(
            session_id = %session_id,
            chars = text.len(),
            "emitting agent_message from transcript"
        );
        bus.emit(ActivityEvent::with_timestamp(
            session_id,
            EventSource::Transcript,
            ActivityPayload::AgentMessage { text },
            timestamp,
        ));
    }

    fn cleanup_dedup(&mut self, now: f64) {
        let ttl = DEDUP_TTL.as_secs_f64();
        let before = self.seen.len();
        self.seen.retain(|_, inserted| now - *inserted <= ttl);
        let removed = before - self.seen.len();
        if removed > 0 {
            debug!(removed, "cleaned stale dedup entries");
        }
    }
}

fn read_from(path: &Path, offset: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut data = String::new();
    file.read_to_string(&mut data)?;
    Ok(data)
}

/// Concatenated text content of an assistant transcript entry.
///
/// An entry qualifies when `type == "assistant"`, `message.role ==
/// "assistant"`, and `message.content` holds at least one text block with
/// non-whitespace content. Tool-use blocks are ignored (they arrive via
/// hooks).
fn extract_assistant_text(entry: &serde_json::Value) -> Option<String> {
    if entry.get("type").and_then(|v| v.as_str()) != Some("assistant") {
        return None;
    }
    let message = entry.get("message")?.as_object()?;
    if message.get("role").and_then(|v| v.as_str()) != Some("assistant") {
        return None;
    }
    let content = message.get("content")?.as_array()?;

    let parts: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(|v| v.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Session id from the entry, or the file stem (the session UUID).
fn extract_session_id(entry: &serde_json::Value, path: &Path) -> String {
    entry
        .get("sessionId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".into())
        })
}

/// The entry's own timestamp (ISO string or epoch number), else now.
fn extract_timestamp(entry: &serde_json::Value) -> f64 {
    match entry.get("timestamp") {
        Some(serde_json::Value::String(raw)) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0)
            .unwrap_or_else(|_| now_ts()),
        Some(value) => value.as_f64().unwrap_or_else(now_ts),
        None => now_ts(),
    }
}

/// Dedup key: session + timestamp rounded to 100 ms, hashed.
///
/// The coarse timestamp collapses the same message arriving from both the
/// hook system and the transcript within the same window.
fn dedup_key(session_id: &str, timestamp: f64) -> String {
    let coarse = (timestamp * 10.0).round() / 10.0;
    let mut hasher = Sha256::new();
    hasher.update(format!("{session_id}:{coarse}"));
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
