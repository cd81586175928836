//! Alert state machine with repeat and escalation for blocked sessions.
//!
//! One `ActiveAlert` per blocked session. The manager subscribes to the
//! activity bus so any non-blocked event for a session resolves its
//! alert; voice-in clears alerts explicitly after dispatching a reply.
//! While an alert is active a repeat timer re-fires it on a fixed
//! interval, delivered to the speech engine over a channel, until the
//! alert is cleared or the repeat budget is spent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::events::{ActivityEvent, BlockReason};

/// A repeat firing, handed to the speech engine for tone + narration replay.
#[derive(Debug, Clone)]
pub struct AlertRepeat {
    pub session_id: String,
    pub block_reason: Option<BlockReason>,
    pub narration_text: String,
    /// 1-based repeat number.
    pub repeat: u32,
}

/// Per-session record that a blocking narration is awaiting a reply.
pub struct ActiveAlert {
    pub block_reason: Option<BlockReason>,
    pub narration_text: String,
    pub created_at: Instant,
    pub repeat_count: u32,
    repeat_task: Option<JoinHandle<()>>,
}

pub struct AlertManager {
    activity_bus: EventBus<ActivityEvent>,
    alerts: Arc<Mutex<HashMap<String, ActiveAlert>>>,
    repeat_interval: Duration,
    max_repeats: u32,
    running: Arc<AtomicBool>,
    repeat_tx: Mutex<Option<mpsc::Sender<AlertRepeat>>>,
    consume_task: Mutex<Option<JoinHandle<()>>>,
}

impl AlertManager {
    pub fn new(config: &Config, activity_bus: EventBus<ActivityEvent>) -> Self {
        Self {
            activity_bus,
            alerts: Arc::new(Mutex::new(HashMap::new())),
            repeat_interval: config.alert_repeat_interval,
            max_repeats: config.alert_max_repeats,
            running: Arc::new(AtomicBool::new(false)),
            repeat_tx: Mutex::new(None),
            consume_task: Mutex::new(None),
        }
    }

    /// Subscribe to the activity bus and start resolving alerts.
    ///
    /// Repeat firings are sent on `repeat_tx`.
    pub fn start(&self, repeat_tx: mpsc::Sender<AlertRepeat>) {
        self.running.store(true, Ordering::SeqCst);
        *self.repeat_tx.lock() = Some(repeat_tx);

        let mut subscription = self.activity_bus.subscribe();
        let alerts = Arc::clone(&self.alerts);
        let running = Arc::clone(&self.running);
        *self.consume_task.lock() = Some(tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                let Some(event) = subscription.recv().await else {
                    break;
                };
                if !event.is_blocked() {
                    let removed = clear_entry(&alerts, &event.session_id);
                    if removed {
                        info!(
                            session_id = %event.session_id,
                            resolved_by = event.kind().as_str(),
                            "alert resolved by activity"
                        );
                    }
                }
            }
        }));
        info!("alert manager started");
    }

    /// Cancel every repeat timer and stop the resolver.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        {
            let mut alerts = self.alerts.lock();
            for (_, alert) in alerts.drain() {
                if let Some(task) = alert.repeat_task {
                    task.abort();
                }
            }
        }
        if let Some(task) = self.consume_task.lock().take() {
            task.abort();
        }
        *self.repeat_tx.lock() = None;
        info!("alert manager stopped");
    }

    pub fn active_count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn has_active(&self, session_id: &str) -> bool {
        self.alerts.lock().contains_key(session_id)
    }

    /// Register an alert for a session and arm its repeat timer.
    ///
    /// An existing alert for the session is replaced and its timer
    /// cancelled.
    pub fn activate(
        &self,
        session_id: &str,
        block_reason: Option<BlockReason>,
        narration_text: &str,
    ) {
        clear_entry(&self.alerts, session_id);

        self.alerts.lock().insert(
            session_id.to_string(),
            ActiveAlert {
                block_reason,
                narration_text: narration_text.to_string(),
                created_at: Instant::now(),
                repeat_count: 0,
                repeat_task: None,
            },
        );

        if !self.repeat_interval.is_zero() && self.running.load(Ordering::Relaxed) {
            let task = self.spawn_repeat_loop(session_id.to_string());
            if let Some(alert) = self.alerts.lock().get_mut(session_id) {
                alert.repeat_task = Some(task);
            }
            debug!(
                session_id,
                interval_secs = self.repeat_interval.as_secs_f64(),
                max = self.max_repeats,
                "repeat timer armed"
            );
        }

        info!(session_id, reason = ?block_reason, "alert activated");
    }

    /// Drop a session's alert and cancel its repeat timer. Idempotent.
    pub fn clear_alert(&self, session_id: &str) {
        if clear_entry(&self.alerts, session_id) {
            info!(session_id, "alert cleared");
        }
    }

    fn spawn_repeat_loop(&self, session_id: String) -> JoinHandle<()> {
        let alerts = Arc::clone(&self.alerts);
        let interval = self.repeat_interval;
        let max_repeats = self.max_repeats;
        let running = Arc::clone(&self.running);
        let tx = self.repeat_tx.lock().clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                let repeat = {
                    let mut map = alerts.lock();
                    match map.get_mut(&session_id) {
                        None => None,
                        Some(alert) if alert.repeat_count >= max_repeats => {
                            info!(
                                session_id = %session_id,
                                max_repeats,
                                "max alert repeats reached — going quiet"
                            );
                            map.remove(&session_id);
                            None
                        }
                        Some(alert) => {
                            alert.repeat_count += 1;
                            Some(AlertRepeat {
                                session_id: session_id.clone(),
                                block_reason: alert.block_reason,
                                narration_text: alert.narration_text.clone(),
                                repeat: alert.repeat_count,
                            })
                        }
                    }
                };

                let Some(repeat) = repeat else { break };
                info!(
                    session_id = %repeat.session_id,
                    repeat = repeat.repeat,
                    max_repeats,
                    "repeating alert"
                );
                if let Some(tx) = &tx {
                    if tx.send(repeat).await.is_err() {
                        warn!("repeat channel closed — stopping repeat loop");
                        break;
                    }
                }
            }
        })
    }
}

/// Remove an alert entry and cancel its timer; returns whether one existed.
fn clear_entry(alerts: &Mutex<HashMap<String, ActiveAlert>>, session_id: &str) -> bool {
    let removed = alerts.lock().remove(session_id);
    match removed {
        Some(alert) => {
            if let Some(task) = alert.repeat_task {
                task.abort();
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ActivityPayload, EventSource};

    fn manager_with(
        interval: Duration,
        max_repeats: u32,
    ) -> (AlertManager, EventBus<ActivityEvent>, mpsc::Receiver<AlertRepeat>) {
        let bus: EventBus<ActivityEvent> = EventBus::new(16);
        let config = Config {
            alert_repeat_interval: interval,
            alert_max_repeats: max_repeats,
            ..Config::default()
        };
        let manager = AlertManager::new(&config, bus.clone());
        let (tx, rx) = mpsc::channel(16);
        manager.start(tx);
        (manager, bus, rx)
    }

    #[tokio::test]
    async fn activate_and_clear_lifecycle() {
        let (manager, _bus, _rx) = manager_with(Duration::from_secs(30), 5);

        manager.activate("sess-a", Some(BlockReason::Question), "question pending");
        assert!(manager.has_active("sess-a"));
        assert_eq!(manager.active_count(), 1);

        manager.clear_alert("sess-a");
        assert!(!manager.has_active("sess-a"));

        // Repeated clear is a no-op.
        manager.clear_alert("sess-a");
        assert_eq!(manager.active_count(), 0);
        manager.stop();
    }

    #[tokio::test]
    async fn non_blocked_activity_resolves_the_alert() {
        let (manager, bus, _rx) = manager_with(Duration::from_secs(30), 5);
        manager.activate("sess-a", None, "blocked");
        assert!(manager.has_active("sess-a"));

        bus.emit(ActivityEvent::new(
            "sess-a",
            EventSource::Hook,
            ActivityPayload::ToolExecuted {
                tool_name: Some("Edit".into()),
                tool_input: None,
                tool_output: None,
            },
        ));

        // The resolver runs on its own task.
        let deadline = Instant::now() + Duration::from_secs(1);
        while manager.has_active("sess-a") && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!manager.has_active("sess-a"));
        manager.stop();
    }

    #[tokio::test]
    async fn blocked_activity_does_not_resolve() {
        let (manager, bus, _rx) = manager_with(Duration::from_secs(30), 5);
        manager.activate("sess-a", None, "blocked");

        bus.emit(ActivityEvent::new(
            "sess-a",
            EventSource::Hook,
            ActivityPayload::AgentBlocked {
                block_reason: None,
                message: None,
                options: None,
            },
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.has_active("sess-a"));
        manager.stop();
    }

    #[tokio::test]
    async fn repeats_fire_until_max_then_idle() {
        let (manager, _bus, mut rx) = manager_with(Duration::from_millis(25), 2);
        manager.activate("sess-a", Some(BlockReason::PermissionPrompt), "perm");

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first repeat")
            .expect("channel open");
        assert_eq!(first.repeat, 1);
        assert_eq!(first.block_reason, Some(BlockReason::PermissionPrompt));

        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second repeat")
            .expect("channel open");
        assert_eq!(second.repeat, 2);

        // The next tick hits the cap: the alert is destroyed and nothing
        // more fires.
        let deadline = Instant::now() + Duration::from_secs(1);
        while manager.active_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.active_count(), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(80), rx.recv())
                .await
                .is_err(),
            "no repeats after max"
        );
        manager.stop();
    }

    #[tokio::test]
    async fn cleared_alert_fires_no_further_repeats() {
        let (manager, _bus, mut rx) = manager_with(Duration::from_millis(25), 10);
        manager.activate("sess-a", None, "blocked");

        let _ = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("one repeat");
        manager.clear_alert("sess-a");

        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err(),
            "cleared alert must stay silent"
        );
        manager.stop();
    }

    #[tokio::test]
    async fn second_blocked_event_replaces_state() {
        let (manager, _bus, _rx) = manager_with(Duration::from_secs(30), 5);
        manager.activate("sess-a", Some(BlockReason::Question), "first");
        manager.activate("sess-a", Some(BlockReason::PermissionPrompt), "second");

        assert_eq!(manager.active_count(), 1);
        let alerts = manager.alerts.lock();
        let alert = alerts.get("sess-a").expect("alert present");
        assert_eq!(alert.block_reason, Some(BlockReason::PermissionPrompt));
        assert_eq!(alert.narration_text, "second");
        assert_eq!(alert.repeat_count, 0);
        drop(alerts);
        manager.stop();
    }

    #[tokio::test]
    async fn zero_interval_disables_repeats() {
        let (manager, _bus, mut rx) = manager_with(Duration::ZERO, 5);
        manager.activate("sess-a", None, "blocked");
        assert!(
            tokio::time::timeout(Duration::from_millis(80), rx.recv())
                .await
                .is_err(),
            "no repeat timer with zero interval"
        );
        assert!(manager.has_active("sess-a"));
        manager.stop();
    }
}
