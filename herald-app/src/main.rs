//! Herald sidecar entry point.
//!
//! Builds the buses and the four pipeline stages, wires them together,
//! and serves the HTTP surface until interrupted. Components start in
//! dependency order (ingest → summarize → voice-out → voice-in) and stop
//! in reverse.

mod server;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use herald_core::{
    Config, EventBus, ListenEngine, SpeechEngine, Summarizer, TranscriptWatcher,
};

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=info,tower_http=info".parse().unwrap()),
        )
        .init();

    info!("Herald starting");

    // ── Config ────────────────────────────────────────────────────────────
    let config = Config::from_env();
    info!(
        port = config.port,
        watch_root = %config.watch_root.display(),
        tts_provider = %config.tts_provider,
        "configuration loaded"
    );

    // ── PID file ──────────────────────────────────────────────────────────
    let _pid_guard = match PidFile::acquire(herald_dir().join("server.pid")) {
        Ok(guard) => guard,
        Err(e) => {
            anyhow::bail!("another Herald instance appears to be running: {e}");
        }
    };

    // ── Buses ─────────────────────────────────────────────────────────────
    let activity_bus: EventBus<herald_core::ActivityEvent> = EventBus::new(config.bus_capacity);
    let narration_bus: EventBus<herald_core::NarrationEvent> = EventBus::new(config.bus_capacity);
    let response_bus: EventBus<herald_core::ResponseEvent> = EventBus::new(config.bus_capacity);

    // ── Stages ────────────────────────────────────────────────────────────
    let watcher = Arc::new(TranscriptWatcher::new(
        config.watch_root.clone(),
        activity_bus.clone(),
    ));
    let summarizer = Arc::new(Summarizer::new(
        &config,
        activity_bus.clone(),
        narration_bus.clone(),
    )?);

    let provider = herald_core::voice_out::tts::create_tts_provider(&config)?;
    let device = Arc::new(herald_core::voice_out::cpal_out::CpalOutput::probe());
    let speech = Arc::new(SpeechEngine::new(
        &config,
        activity_bus.clone(),
        narration_bus.clone(),
        provider,
        device,
    )?);

    let mut listen = ListenEngine::new(
        &config,
        activity_bus.clone(),
        response_bus.clone(),
        speech.alerts(),
        speech.critical_complete(),
    )?;
    listen.set_confirmer(Arc::clone(&speech));
    let listen = Arc::new(listen);

    // ── Start in dependency order ─────────────────────────────────────────
    if let Err(e) = watcher.start() {
        warn!("transcript watcher failed to start: {e}");
    }
    summarizer.start().await?;
    speech.start().await?;
    listen.start().await?;

    // ── Serve ─────────────────────────────────────────────────────────────
    let app_state = AppState {
        activity_bus,
        narration_bus,
        response_bus,
        watcher: Arc::clone(&watcher),
        summarizer: Arc::clone(&summarizer),
        speech: Arc::clone(&speech),
        listen: Arc::clone(&listen),
    };
    let app = server::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Herald listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // ── Stop in reverse order ─────────────────────────────────────────────
    listen.stop().await;
    speech.stop().await;
    summarizer.stop().await;
    watcher.stop();
    info!("Herald stopped");
    Ok(())
}

fn herald_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".herald")
}

/// PID file guard: refuses to start while a live instance holds the file
/// and removes it on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn acquire(path: PathBuf) -> anyhow::Result<Self> {
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                if process_alive(pid) {
                    anyhow::bail!("PID file {} points at live process {pid}", path.display());
                }
                warn!(pid, "removing stale PID file");
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to remove PID file: {e}");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Best effort off Linux: treat any recorded PID as stale rather than
/// refusing to start.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_acquire_write_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        {
            let _guard = PidFile::acquire(path.clone()).expect("acquire");
            let recorded: u32 = std::fs::read_to_string(&path)
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            assert_eq!(recorded, std::process::id());
        }
        assert!(!path.exists(), "guard removes the PID file on drop");
    }

    #[test]
    fn live_pid_blocks_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        // Our own PID is definitely alive.
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        if cfg!(target_os = "linux") {
            assert!(PidFile::acquire(path.clone()).is_err());
        }
    }

    #[test]
    fn stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.pid");
        std::fs::write(&path, "4294967294").unwrap();
        let _guard = PidFile::acquire(path.clone()).expect("stale pid replaced");
        let recorded: u32 = std::fs::read_to_string(&path)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(recorded, std::process::id());
    }
}
