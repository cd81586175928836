//! Optional remote audio sink.
//!
//! When an ingest URL is configured, narration PCM is forwarded as mono
//! 16 kHz frames so a remote listener can follow along. Publish failures
//! are logged and swallowed — remote delivery is best-effort and never
//! affects local playback. Unconfigured or failed setup leaves the sink
//! disconnected and `publish` a no-op.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::config::{Config, SAMPLE_RATE};
use crate::error::Result;

pub struct RemoteSink {
    client: reqwest::Client,
    url: String,
    token: String,
    connected: AtomicBool,
}

impl RemoteSink {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(config.tts_timeout)
                .build()?,
            url: config.remote_sink_url.trim_end_matches('/').to_string(),
            token: config.remote_sink_token.clone(),
            connected: AtomicBool::new(false),
        })
    }

    /// Whether credentials are present.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Open the session with the remote room.
    pub async fn start(&self) {
        if !self.is_configured() {
            info!("remote sink not configured — remote audio disabled");
            return;
        }
        let result = self
            .client
            .post(format!("{}/session", self.url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "identity": "herald",
                "sample_rate": SAMPLE_RATE,
                "channels": 1,
            }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                self.connected.store(true, Ordering::Relaxed);
                info!(url = %self.url, "connected to remote audio sink");
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "remote sink rejected session");
            }
            Err(e) => {
                warn!("failed to connect to remote sink: {e}");
            }
        }
    }

    pub async fn stop(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            let _ = self
                .client
                .delete(format!("{}/session", self.url))
                .bearer_auth(&self.token)
                .send()
                .await;
            info!("disconnected from remote audio sink");
        }
    }

    /// Forward one mono 16 kHz PCM frame. Failures are swallowed.
    pub async fn publish(&self, pcm: &[u8]) {
        if !self.is_connected() || pcm.is_empty() {
            return;
        }
        let result = self
            .client
            .post(format!("{}/frames", self.url))
            .bearer_auth(&self.token)
            .header("content-type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await;
        if let Err(e) = result {
            warn!("failed to publish audio frame to remote sink: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_sink_stays_disconnected() {
        let sink = RemoteSink::new(&Config::default()).unwrap();
        assert!(!sink.is_configured());
        sink.start().await;
        assert!(!sink.is_connected());
        // publish is a no-op; must not panic or block.
        sink.publish(&[0u8; 32]).await;
    }

    #[tokio::test]
    async fn failed_connection_stays_disconnected() {
        let config = Config {
            remote_sink_url: "http://127.0.0.1:1".into(),
            ..Config::default()
        };
        let sink = RemoteSink::new(&config).unwrap();
        assert!(sink.is_configured());
        sink.start().await;
        assert!(!sink.is_connected());
    }
}
