//! Playback queue for agent speech.
//!
//! Items render one at a time in receipt order. Each start is scheduled at
//! `max(cursor, device_now)` and the cursor advances by the item's duration, so
//! consecutive items butt up against each other without overlapping. Completion
//! notifications carry the render id they belong to; anything that does not
//! match the current render is ignored.

use crate::audio::{PlaybackItem, resample};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// One scheduled render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Render id, echoed by the completion handle.
    pub id: u64,
    /// Audio to play.
    pub item: PlaybackItem,
    /// Start time on the output's clock, in seconds.
    pub start_at: f64,
}

/// Audio sink for agent speech.
///
/// Implementations must not call back into the queue from inside [`AudioOutput::start`];
/// completion is reported later through the [`CompletionHandle`].
pub trait AudioOutput: Send + Sync {
    /// Rate the device renders at. Items are resampled to it before they are queued.
    fn sample_rate(&self) -> Option<u32> {
        None
    }

    /// Output clock, in seconds.
    fn current_time(&self) -> f64;

    /// Begin rendering. `done` must be completed once the last sample has played.
    fn start(&self, request: RenderRequest, done: CompletionHandle) -> Result<()>;

    /// Silence the current render immediately. Its completion need not fire.
    fn stop_current(&self);

    /// Release the device.
    fn close(&self);
}

/// Reports the end of one render back to its queue.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    id: u64,
    queue: Weak<QueueInner>,
}

impl CompletionHandle {
    /// Render id this handle belongs to.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Signal that the render finished. Duplicate or late signals are ignored.
    pub fn complete(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.on_complete(self.id);
        }
    }
}

struct QueueState {
    items: VecDeque<PlaybackItem>,
    playing: Option<u64>,
    next_id: u64,
    next_start: f64,
    closed: bool,
}

struct QueueInner {
    output: Arc<dyn AudioOutput>,
    state: Mutex<QueueState>,
    speaking: watch::Sender<bool>,
    this: Weak<QueueInner>,
}

/// FIFO of decoded agent speech in front of an [`AudioOutput`].
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PlaybackQueue")
            .field("queued", &state.items.len())
            .field("playing", &state.playing)
            .field("next_start", &state.next_start)
            .field("closed", &state.closed)
            .finish()
    }
}

impl PlaybackQueue {
    /// Create an idle queue in front of `output`.
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let (speaking, _) = watch::channel(false);
        let inner = Arc::new_cyclic(|this| QueueInner {
            output,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                playing: None,
                next_id: 1,
                next_start: 0.0,
                closed: false,
            }),
            speaking,
            this: this.clone(),
        });
        Self { inner }
    }

    /// Queue an item. Starts it right away if nothing is playing.
    pub fn enqueue(&self, item: PlaybackItem) {
        let item = match self.inner.output.sample_rate() {
            Some(rate) if rate != item.sample_rate() => {
                PlaybackItem::new(resample(item.samples(), item.sample_rate(), rate), rate)
            }
            _ => item,
        };

        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.items.push_back(item);
        if state.playing.is_none() {
            self.inner.start_next(&mut state);
        }
    }

    /// Discard queued speech and silence the current item.
    pub fn interrupt(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.items.len();
        self.inner.reset(&mut state);
        tracing::debug!(dropped, "playback interrupted");
    }

    /// Interrupt and refuse further items.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.inner.reset(&mut state);
    }

    /// Whether an item is rendering.
    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing.is_some()
    }

    /// Items waiting behind the current render.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Whether the agent is audibly speaking.
    pub fn is_speaking(&self) -> bool {
        *self.inner.speaking.borrow()
    }

    /// Watch the speaking flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.speaking.subscribe()
    }
}

impl QueueInner {
    fn start_next(&self, state: &mut QueueState) {
        while let Some(item) = state.items.pop_front() {
            let id = state.next_id;
            state.next_id += 1;

            let start_at = state.next_start.max(self.output.current_time());
            let duration = item.duration_secs();
            let done = CompletionHandle { id, queue: self.this.clone() };

            match self.output.start(RenderRequest { id, item, start_at }, done) {
                Ok(()) => {
                    state.next_start = start_at + duration;
                    state.playing = Some(id);
                    self.set_speaking(true);
                    tracing::trace!(id, start_at, duration, "render started");
                    return;
                }
                Err(e) => tracing::warn!(id, error = %e, "failed to start render, skipping item"),
            }
        }

        state.playing = None;
        self.set_speaking(false);
    }

    fn on_complete(&self, id: u64) {
        let mut state = self.state.lock();
        if state.playing != Some(id) {
            tracing::trace!(id, current = ?state.playing, "ignoring stale completion");
            return;
        }
        state.playing = None;
        if state.closed {
            return;
        }
        self.start_next(&mut state);
    }

    fn reset(&self, state: &mut QueueState) {
        if state.playing.take().is_some() {
            self.output.stop_current();
        }
        state.items.clear();
        state.next_start = 0.0;
        self.set_speaking(false);
    }

    fn set_speaking(&self, speaking: bool) {
        self.speaking.send_if_modified(|current| {
            if *current == speaking {
                false
            } else {
                *current = speaking;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        now: Mutex<f64>,
        started: Mutex<Vec<(RenderRequest, CompletionHandle)>>,
        stops: Mutex<usize>,
    }

    impl AudioOutput for Recorder {
        fn current_time(&self) -> f64 {
            *self.now.lock()
        }
        fn start(&self, request: RenderRequest, done: CompletionHandle) -> Result<()> {
            self.started.lock().push((request, done));
            Ok(())
        }
        fn stop_current(&self) {
            *self.stops.lock() += 1;
        }
        fn close(&self) {}
    }

    fn item(secs: f64) -> PlaybackItem {
        PlaybackItem::new(vec![0.0; (secs * 16000.0) as usize], 16000)
    }

    #[test]
    fn test_enqueue_while_playing_waits() {
        let output = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(output.clone());

        queue.enqueue(item(0.5));
        queue.enqueue(item(0.25));

        assert_eq!(output.started.lock().len(), 1);
        assert_eq!(queue.queued(), 1);
        assert!(queue.is_speaking());
    }

    #[test]
    fn test_duplicate_completion_starts_once() {
        let output = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(output.clone());

        queue.enqueue(item(0.5));
        queue.enqueue(item(0.5));
        queue.enqueue(item(0.5));

        let first = output.started.lock()[0].1.clone();
        first.complete();
        first.complete();

        assert_eq!(output.started.lock().len(), 2);
        assert_eq!(queue.queued(), 1);
    }

    #[test]
    fn test_cursor_catches_up_with_device_clock() {
        let output = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(output.clone());

        queue.enqueue(item(0.5));
        let done = output.started.lock()[0].1.clone();

        // Output clock ran ahead of the cursor (e.g. device latency).
        *output.now.lock() = 2.0;
        done.complete();
        queue.enqueue(item(0.5));

        let starts: Vec<f64> = output.started.lock().iter().map(|(r, _)| r.start_at).collect();
        assert_eq!(starts, vec![0.0, 2.0]);
    }

    #[test]
    fn test_interrupt_resets_cursor_and_speaking() {
        let output = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(output.clone());
        let speaking = queue.subscribe();

        queue.enqueue(item(1.0));
        queue.enqueue(item(1.0));
        assert!(*speaking.borrow());

        queue.interrupt();
        assert!(!*speaking.borrow());
        assert_eq!(queue.queued(), 0);
        assert_eq!(*output.stops.lock(), 1);

        // Completion for the silenced render arrives late.
        let stale = output.started.lock()[0].1.clone();
        stale.complete();
        assert_eq!(output.started.lock().len(), 1);

        queue.enqueue(item(1.0));
        assert_eq!(output.started.lock()[1].0.start_at, 0.0);
    }

    #[test]
    fn test_stop_refuses_new_items() {
        let output = Arc::new(Recorder::default());
        let queue = PlaybackQueue::new(output.clone());
        queue.stop();
        queue.enqueue(item(0.1));
        assert!(output.started.lock().is_empty());
        assert!(!queue.is_playing());
    }
}
