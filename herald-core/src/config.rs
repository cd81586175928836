//! Runtime configuration, read from the environment once at startup.
//!
//! Every tunable has a compiled-in default; `Config::from_env()` overrides
//! from `HERALD_*` variables, falling back to the default on unparseable
//! values and clamping numeric settings to sane ranges. The resulting
//! struct is immutable and threaded explicitly into constructors — nothing
//! reads the environment after startup.

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide PCM sample rate (Hz). Tones, synthesis output, microphone
/// capture and the STT upload all use this rate; device rates are
/// converted at the edges.
pub const SAMPLE_RATE: u32 = 16_000;

/// Runtime configuration for the Herald pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the sidecar server.
    pub port: u16,
    /// Root directory watched for `*.jsonl` transcript files.
    pub watch_root: PathBuf,
    /// Per-subscriber bus buffer capacity.
    pub bus_capacity: usize,

    // ── Summarizer ───────────────────────────────────────────────────────
    /// Window during which consecutive tool events are batched.
    pub batch_window: Duration,
    /// Batch size that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Base URL of the local generative endpoint (Ollama-style API).
    pub llm_base_url: String,
    /// Model name passed to the generative endpoint.
    pub llm_model: String,
    /// Per-request timeout for summarization calls.
    pub llm_timeout: Duration,

    // ── Voice out ────────────────────────────────────────────────────────
    /// TTS provider selector: "elevenlabs" (default) or "inworld".
    pub tts_provider: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_base_url: String,
    pub elevenlabs_voice_id: String,
    pub elevenlabs_model: String,
    pub inworld_api_key: String,
    pub inworld_base_url: String,
    pub inworld_voice_id: String,
    pub inworld_model: String,
    pub inworld_temperature: f32,
    pub inworld_speaking_rate: f32,
    /// Per-request timeout for synthesis calls.
    pub tts_timeout: Duration,
    /// Queue depth above which LOW narrations are skipped.
    pub audio_backlog_threshold: usize,
    /// Interval between repeat alerts. Zero disables repeats.
    pub alert_repeat_interval: Duration,
    /// Maximum repeat alerts before an alert goes quiet.
    pub alert_max_repeats: u32,
    /// Remote audio sink ingest URL. Empty = remote sink disabled.
    pub remote_sink_url: String,
    /// Bearer token for the remote sink.
    pub remote_sink_token: String,

    // ── Voice in ─────────────────────────────────────────────────────────
    pub stt_api_key: String,
    pub stt_base_url: String,
    pub stt_model: String,
    /// Per-request timeout for transcription calls.
    pub stt_timeout: Duration,
    /// How long to wait for speech onset before giving up.
    pub listen_timeout: Duration,
    /// RMS level below which a chunk counts as silence.
    pub silence_threshold: f32,
    /// Contiguous silence that ends a capture.
    pub silence_duration: Duration,
    /// Hard cap on a single capture.
    pub max_record_duration: Duration,
    /// Minimum match confidence for non-verbatim dispatch. Also the floor
    /// for fuzzy matching.
    pub confidence_threshold: f32,
    /// Forced dispatch method ("tmux" / "applescript" / "xdotool"), empty
    /// for auto-detection.
    pub dispatch_method: String,

    // ── Shared ───────────────────────────────────────────────────────────
    /// Re-probe interval for unavailable HTTP dependencies.
    pub health_recheck: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7865,
            watch_root: default_watch_root(),
            bus_capacity: 256,

            batch_window: Duration::from_millis(500),
            max_batch_size: 10,
            llm_base_url: "http://localhost:11434".into(),
            llm_model: "qwen2.5:0.5b".into(),
            llm_timeout: Duration::from_secs(5),

            tts_provider: "elevenlabs".into(),
            elevenlabs_api_key: String::new(),
            elevenlabs_base_url: "https://api.elevenlabs.io".into(),
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            elevenlabs_model: "eleven_turbo_v2_5".into(),
            inworld_api_key: String::new(),
            inworld_base_url: "https://api.inworld.ai".into(),
            inworld_voice_id: "Ashley".into(),
            inworld_model: "inworld-tts-1.5-max".into(),
            inworld_temperature: 1.1,
            inworld_speaking_rate: 1.0,
            tts_timeout: Duration::from_secs(10),
            audio_backlog_threshold: 3,
            alert_repeat_interval: Duration::from_secs(30),
            alert_max_repeats: 5,
            remote_sink_url: String::new(),
            remote_sink_token: String::new(),

            stt_api_key: String::new(),
            stt_base_url: "https://api.openai.com".into(),
            stt_model: "whisper-1".into(),
            stt_timeout: Duration::from_secs(10),
            listen_timeout: Duration::from_secs(30),
            silence_threshold: 0.01,
            silence_duration: Duration::from_secs_f64(1.5),
            max_record_duration: Duration::from_secs(15),
            confidence_threshold: 0.6,
            dispatch_method: String::new(),

            health_recheck: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Build a config from `HERALD_*` environment variables over defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            port: env_parse("HERALD_PORT", d.port),
            watch_root: std::env::var_os("HERALD_WATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or(d.watch_root),
            bus_capacity: env_parse("HERALD_BUS_CAPACITY", d.bus_capacity).clamp(1, 65_536),

            batch_window: env_duration("HERALD_BATCH_WINDOW_MS", d.batch_window, DurationUnit::Millis),
            max_batch_size: env_parse("HERALD_MAX_BATCH_SIZE", d.max_batch_size).clamp(1, 1000),
            llm_base_url: env_str("HERALD_LLM_BASE_URL", d.llm_base_url),
            llm_model: env_str("HERALD_LLM_MODEL", d.llm_model),
            llm_timeout: env_duration("HERALD_LLM_TIMEOUT", d.llm_timeout, DurationUnit::Secs),

            tts_provider: env_str("HERALD_TTS_PROVIDER", d.tts_provider)
                .trim()
                .to_ascii_lowercase(),
            elevenlabs_api_key: env_str("HERALD_ELEVENLABS_API_KEY", d.elevenlabs_api_key),
            elevenlabs_base_url: env_str("HERALD_ELEVENLABS_BASE_URL", d.elevenlabs_base_url),
            elevenlabs_voice_id: env_str("HERALD_TTS_VOICE_ID", d.elevenlabs_voice_id),
            elevenlabs_model: env_str("HERALD_TTS_MODEL", d.elevenlabs_model),
            inworld_api_key: env_str("HERALD_INWORLD_API_KEY", d.inworld_api_key),
            inworld_base_url: env_str("HERALD_INWORLD_BASE_URL", d.inworld_base_url),
            inworld_voice_id: env_str("HERALD_INWORLD_VOICE_ID", d.inworld_voice_id),
            inworld_model: env_str("HERALD_INWORLD_MODEL", d.inworld_model),
            inworld_temperature: env_parse("HERALD_INWORLD_TEMPERATURE", d.inworld_temperature)
                .clamp(0.0, 2.0),
            inworld_speaking_rate: env_parse("HERALD_INWORLD_SPEAKING_RATE", d.inworld_speaking_rate)
                .clamp(0.25, 4.0),
            tts_timeout: env_duration("HERALD_TTS_TIMEOUT", d.tts_timeout, DurationUnit::Secs),
            audio_backlog_threshold: env_parse(
                "HERALD_AUDIO_BACKLOG_THRESHOLD",
                d.audio_backlog_threshold,
            ),
            alert_repeat_interval: env_duration(
                "HERALD_ALERT_REPEAT_INTERVAL",
                d.alert_repeat_interval,
                DurationUnit::Secs,
            ),
            alert_max_repeats: env_parse("HERALD_ALERT_MAX_REPEATS", d.alert_max_repeats),
            remote_sink_url: env_str("HERALD_REMOTE_SINK_URL", d.remote_sink_url),
            remote_sink_token: env_str("HERALD_REMOTE_SINK_TOKEN", d.remote_sink_token),

            stt_api_key: env_str("HERALD_STT_API_KEY", d.stt_api_key),
            stt_base_url: env_str("HERALD_STT_BASE_URL", d.stt_base_url),
            stt_model: env_str("HERALD_STT_MODEL", d.stt_model),
            stt_timeout: env_duration("HERALD_STT_TIMEOUT", d.stt_timeout, DurationUnit::Secs),
            listen_timeout: env_duration("HERALD_LISTEN_TIMEOUT", d.listen_timeout, DurationUnit::Secs),
            silence_threshold: env_parse("HERALD_SILENCE_THRESHOLD", d.silence_threshold)
                .clamp(0.0001, 0.5),
            silence_duration: env_duration(
                "HERALD_SILENCE_DURATION",
                d.silence_duration,
                DurationUnit::Secs,
            ),
            max_record_duration: env_duration(
                "HERALD_MAX_RECORD_DURATION",
                d.max_record_duration,
                DurationUnit::Secs,
            ),
            confidence_threshold: env_parse("HERALD_CONFIDENCE_THRESHOLD", d.confidence_threshold)
                .clamp(0.0, 1.0),
            dispatch_method: env_str("HERALD_DISPATCH_METHOD", d.dispatch_method)
                .trim()
                .to_ascii_lowercase(),

            health_recheck: env_duration("HERALD_HEALTH_RECHECK", d.health_recheck, DurationUnit::Secs),
        }
    }
}

fn default_watch_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

fn env_str(key: &str, default_value: String) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default_value,
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default_value: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default_value)
}

enum DurationUnit {
    Secs,
    Millis,
}

fn env_duration(key: &str, default_value: Duration, unit: DurationUnit) -> Duration {
    let raw = match std::env::var(key) {
        Ok(v) => v,
        Err(_) => return default_value,
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => match unit {
            DurationUnit::Secs => Duration::from_secs_f64(v.min(86_400.0)),
            DurationUnit::Millis => Duration::from_secs_f64((v / 1000.0).min(86_400.0)),
        },
        _ => default_value,
    }
}
