//! Time-windowed batcher that collapses rapid tool events.
//!
//! Consecutive `tool_executed` events are accumulated and rendered as one
//! narration. A batch flushes when it reaches the size cap (inline, the
//! caller emits the returned narration), when the batch window elapses
//! (the timer task emits on the narration bus directly), or when the
//! caller force-flushes because a non-tool event arrived or the
//! summarizer is stopping.
//!
//! Every flush bumps a generation counter; the timer re-checks the
//! generation it was scheduled against, so an explicit flush can never be
//! followed by a stale timer flush of the same batch.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bus::EventBus;
use crate::events::{ActivityEvent, NarrationEvent};
use crate::summarize::template::TemplateEngine;

pub struct EventBatcher {
    inner: Arc<Mutex<BatchInner>>,
    window: Duration,
    max_size: usize,
    engine: Arc<TemplateEngine>,
    narration_bus: EventBus<NarrationEvent>,
}

struct BatchInner {
    batch: Vec<ActivityEvent>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl EventBatcher {
    pub fn new(
        window: Duration,
        max_size: usize,
        engine: Arc<TemplateEngine>,
        narration_bus: EventBus<NarrationEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BatchInner {
                batch: Vec::new(),
                generation: 0,
                timer: None,
            })),
            window,
            max_size: max_size.max(1),
            engine,
            narration_bus,
        }
    }

    /// Add a tool event to the batch.
    ///
    /// Returns the rendered narration when the size cap forces an
    /// immediate flush; otherwise the batch keeps accumulating and will
    /// flush on the window timer.
    pub fn add(&self, event: ActivityEvent) -> Option<NarrationEvent> {
        let events = {
            let mut inner = self.inner.lock();
            inner.batch.push(event);
            debug!(batch_size = inner.batch.len(), "event added to batch");

            if inner.batch.len() >= self.max_size {
                debug!(max = self.max_size, "batch reached size cap — flushing");
                Some(Self::take_batch(&mut inner))
            } else {
                if inner.batch.len() == 1 {
                    self.schedule_flush(&mut inner);
                }
                None
            }
        }?;
        self.engine.render_batch(&events)
    }

    /// Force-flush the current batch, cancelling any pending timer.
    ///
    /// Returns the rendered narration, or `None` when the batch is empty.
    pub fn flush(&self) -> Option<NarrationEvent> {
        let events = {
            let mut inner = self.inner.lock();
            if inner.batch.is_empty() {
                Self::cancel_timer(&mut inner);
                return None;
            }
            Some(Self::take_batch(&mut inner))
        }?;
        debug!(events = events.len(), "batch flushed explicitly");
        self.engine.render_batch(&events)
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().batch.is_empty()
    }

    /// Take the batch and invalidate any scheduled timer.
    fn take_batch(inner: &mut BatchInner) -> Vec<ActivityEvent> {
        inner.generation = inner.generation.wrapping_add(1);
        Self::cancel_timer(inner);
        std::mem::take(&mut inner.batch)
    }

    fn cancel_timer(inner: &mut BatchInner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    /// Arm the window timer for the batch that just started.
    fn schedule_flush(&self, inner: &mut BatchInner) {
        Self::cancel_timer(inner);
        let scheduled_generation = inner.generation;

        let shared = Arc::clone(&self.inner);
        let engine = Arc::clone(&self.engine);
        let bus = self.narration_bus.clone();
        let window = self.window;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let events = {
                let mut inner = shared.lock();
                if inner.generation != scheduled_generation || inner.batch.is_empty() {
                    return;
                }
                EventBatcher::take_batch(&mut inner)
            };
            debug!(events = events.len(), "batch window elapsed — flushing");
            if let Some(narration) = engine.render_batch(&events) {
                bus.emit(narration);
            }
        }));
    }
}

impl Drop for EventBatcher {
    fn drop(&mut self) {
        Self::cancel_timer(&mut self.inner.lock());
    }
}
