use thiserror::Error;

/// All errors produced by herald-core.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no audio output device found")]
    NoOutputDevice,

    #[error("playback halted before completion")]
    PlaybackHalted,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HeraldError>;
