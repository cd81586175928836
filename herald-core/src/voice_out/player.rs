//! Priority-queued audio player with interrupt support.
//!
//! Queue items are `(rank, sequence, pcm)`: rank 0 = critical, 1 =
//! normal, 2 = low. Within a rank the monotonic sequence keeps FIFO
//! order. Low items are dropped at admission when the backlog exceeds the
//! threshold; critical items are never dropped. A single blocking worker
//! owns the output device, so playback is naturally serialised; the
//! immediate path shares the device through a play mutex.
//!
//! `interrupt()` sets the interrupt flag, rebuilds the queue keeping only
//! critical items, and halts the in-progress playback via the device's
//! stop primitive. The worker discards non-critical items dequeued while
//! the flag is set and clears the flag at the next playback.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SAMPLE_RATE;
use crate::error::{HeraldError, Result};
use crate::events::BlockReason;
use crate::voice_out::tones::AlertTones;

/// Exclusive handle to one audio output sink.
///
/// `play_blocking` runs on a worker thread and must not return until the
/// clip has drained or `halt` aborted it. Implementations are free to be
/// `!Send` internally (per-playback streams) as long as the handle itself
/// is shareable.
pub trait OutputDevice: Send + Sync + 'static {
    /// Whether an output device was detected.
    fn is_available(&self) -> bool;

    /// Play 16 kHz i16 mono PCM to completion.
    ///
    /// # Errors
    /// `HeraldError::PlaybackHalted` when `halt` aborted the clip; device
    /// errors otherwise.
    fn play_blocking(&self, pcm: &[u8]) -> Result<()>;

    /// Abort the in-progress `play_blocking`, if any.
    fn halt(&self);
}

struct QueueItem {
    rank: u8,
    seq: u64,
    pcm: Vec<u8>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}
impl Eq for QueueItem {}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.rank, self.seq).cmp(&(other.rank, other.seq))
    }
}

struct PlayState {
    heap: BinaryHeap<Reverse<QueueItem>>,
    interrupted: bool,
    stopped: bool,
}

struct PlayerShared {
    device: Arc<dyn OutputDevice>,
    state: Mutex<PlayState>,
    wakeup: Condvar,
    playing: AtomicBool,
    /// Serialises device access between the worker and the immediate path.
    play_lock: Mutex<()>,
    sequence: AtomicU64,
}

pub struct AudioPlayer {
    shared: Arc<PlayerShared>,
    tones: AlertTones,
    backlog_threshold: usize,
    available: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    pub fn new(device: Arc<dyn OutputDevice>, backlog_threshold: usize) -> Self {
        Self {
            shared: Arc::new(PlayerShared {
                device,
                state: Mutex::new(PlayState {
                    heap: BinaryHeap::new(),
                    interrupted: false,
                    stopped: false,
                }),
                wakeup: Condvar::new(),
                playing: AtomicBool::new(false),
                play_lock: Mutex::new(()),
                sequence: AtomicU64::new(0),
            }),
            tones: AlertTones::generate(SAMPLE_RATE),
            backlog_threshold,
            available: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Probe the output device and start the playback worker.
    pub fn start(&self) {
        if !self.shared.device.is_available() {
            warn!("no audio output device — playback disabled");
            return;
        }
        self.available.store(true, Ordering::Relaxed);
        self.shared.state.lock().stopped = false;

        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(tokio::task::spawn_blocking(move || worker_loop(shared)));
        info!("audio output device detected — playback enabled");
    }

    /// Stop the worker, drain the queue and halt any in-progress playback.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.heap.clear();
        }
        self.shared.wakeup.notify_all();
        self.shared.device.halt();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        self.available.store(false, Ordering::Relaxed);
    }

    /// Whether an output device was detected at startup.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Number of items currently waiting in the playback queue.
    pub fn queue_depth(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Relaxed)
    }

    /// Add PCM audio to the playback queue at the given rank.
    ///
    /// Low items (rank 2) are dropped when the queue depth exceeds the
    /// backlog threshold. Critical items (rank 0) are always admitted.
    pub fn enqueue(&self, pcm: Vec<u8>, rank: u8) {
        if !self.is_available() {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return;
            }
            if rank == 2 && state.heap.len() > self.backlog_threshold {
                warn!("dropping low-priority audio — backlog");
                return;
            }
            let seq = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
            state.heap.push(Reverse(QueueItem { rank, seq, pcm }));
        }
        self.shared.wakeup.notify_one();
    }

    /// Preempt: drop queued non-critical items and halt current playback.
    pub fn interrupt(&self) {
        {
            let mut state = self.shared.state.lock();
            state.interrupted = true;
            let kept: Vec<Reverse<QueueItem>> = state
                .heap
                .drain()
                .filter(|Reverse(item)| item.rank == 0)
                .collect();
            state.heap.extend(kept);
        }
        self.shared.device.halt();
        debug!("playback interrupted — non-critical queue drained");
    }

    /// Play the alert tone for a block reason, bypassing the queue.
    pub async fn play_alert(&self, block_reason: Option<BlockReason>) {
        let tone = self.tones.get(block_reason).to_vec();
        self.play_immediate(tone).await;
    }

    /// Play raw PCM immediately, bypassing the queue.
    ///
    /// Shares the device with the worker through the play mutex, so an
    /// immediate clip waits for (or follows an interrupt of) the current
    /// queued playback rather than overlapping it.
    pub async fn play_immediate(&self, pcm: Vec<u8>) {
        if !self.is_available() || pcm.is_empty() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let played = tokio::task::spawn_blocking(move || {
            let _guard = shared.play_lock.lock();
            shared.device.play_blocking(&pcm)
        })
        .await;
        match played {
            Ok(Ok(())) | Ok(Err(HeraldError::PlaybackHalted)) => {}
            Ok(Err(e)) => warn!("immediate playback failed: {e}"),
            Err(e) => warn!("immediate playback task failed: {e}"),
        }
    }
}

fn worker_loop(shared: Arc<PlayerShared>) {
    debug!("playback worker started");
    loop {
        let (item, was_interrupted) = {
            let mut state = shared.state.lock();
            loop {
                if state.stopped {
                    debug!("playback worker stopped");
                    return;
                }
                if let Some(Reverse(item)) = state.heap.pop() {
                    break (item, state.interrupted);
                }
                shared.wakeup.wait(&mut state);
            }
        };

        // During an interrupt, discard non-critical items; the flag clears
        // at the next playback.
        if was_interrupted && item.rank > 0 {
            debug!(rank = item.rank, "discarding queued item after interrupt");
            continue;
        }
        shared.state.lock().interrupted = false;

        shared.playing.store(true, Ordering::Relaxed);
        let result = {
            let _guard = shared.play_lock.lock();
            shared.device.play_blocking(&item.pcm)
        };
        shared.playing.store(false, Ordering::Relaxed);

        match result {
            Ok(()) | Err(HeraldError::PlaybackHalted) => {}
            Err(e) => warn!("audio playback failed: {e}"),
        }
    }
}
