//! Reset-able one-shot signal.
//!
//! Voice-out raises the signal when it finishes playing a blocking
//! narration; voice-in clears it when a new blocked event arrives and then
//! waits on it before opening the microphone, so the two stages never run
//! the speaker and the microphone at the same time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A boolean signal that can be set, cleared and awaited.
#[derive(Debug, Clone)]
pub struct ResetSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ResetSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal, waking all waiters.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the signal. Subsequent waits block until the next `set`.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the signal is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for inspects the current value before awaiting changes, so a
        // signal set before this call returns immediately.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Wait until the signal is set, or `timeout` elapses.
    ///
    /// Returns `true` if the signal was set within the window.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let signal = ResetSignal::new();
        signal.set();
        assert!(signal.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn wait_times_out_when_cleared() {
        let signal = ResetSignal::new();
        signal.set();
        signal.clear();
        assert!(!signal.wait_timeout(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn set_wakes_a_pending_waiter() {
        let signal = ResetSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait_timeout(Duration::from_secs(1)).await })
        };
        tokio::task::yield_now().await;
        signal.set();
        assert!(waiter.await.expect("waiter task"));
    }
}
