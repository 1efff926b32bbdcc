//! In-memory doubles for the transport and audio devices.
#![allow(dead_code)]

use aria_voice::{
    AgentEndpoint, AudioBackend, AudioOutput, CompletionHandle, Connector, FrameCallback,
    InputDevice, RenderRequest, Result, SharedTransport, StrategyPreference, Transport,
    VoiceConfig, VoiceError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

/// Wait until `cond` holds, panicking after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

pub fn test_config() -> VoiceConfig {
    VoiceConfig::new("agent_test")
        .with_url("wss://agent.invalid/v1/convai/conversation")
        .with_wire_sample_rate(None)
        .with_strategy(StrategyPreference::RealtimeTap)
}

pub fn audio_message(payload: &str) -> String {
    serde_json::json!({"type": "audio", "audio_event": {"audio_base_64": payload}}).to_string()
}

pub fn audio_frame(chunk: &str) -> String {
    serde_json::json!({"user_audio_chunk": chunk}).to_string()
}

// ── Transport ───────────────────────────────────────────────────────────

pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String>>>,
    closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn push_inbound(&self, text: impl Into<String>) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Ok(text.into()));
        }
    }

    /// Deliver a read error in place of the next inbound message.
    pub fn push_inbound_error(&self, error: VoiceError) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Err(error));
        }
    }

    /// Simulate the agent hanging up.
    pub fn remote_close(&self) {
        self.inbound_tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(VoiceError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn next_message(&self) -> Option<Result<String>> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockConnector {
    pub transport: Arc<MockTransport>,
    gate: Semaphore,
    connects: AtomicUsize,
    refuse: bool,
}

impl MockConnector {
    /// Handshake completes only after [`MockConnector::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            transport: MockTransport::new(),
            gate: Semaphore::new(0),
            connects: AtomicUsize::new(0),
            refuse: false,
        })
    }

    /// Handshake completes immediately.
    pub fn open() -> Arc<Self> {
        let connector = Self::gated();
        connector.release();
        connector
    }

    /// Handshake always fails.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            transport: MockTransport::new(),
            gate: Semaphore::new(0),
            connects: AtomicUsize::new(0),
            refuse: true,
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &AgentEndpoint) -> Result<SharedTransport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(VoiceError::connection("handshake rejected"));
        }
        let permit = self.gate.acquire().await.map_err(|e| VoiceError::connection(e.to_string()))?;
        permit.forget();
        Ok(self.transport.clone())
    }
}

// ── Devices ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MicState {
    callback: Mutex<Option<FrameCallback>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MicState {
    /// Deliver one device block. Returns false when nothing is listening.
    pub fn emit(&self, block: &[f32]) -> bool {
        match self.callback.lock().as_mut() {
            Some(callback) => {
                callback(block);
                true
            }
            None => false,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

pub struct MockMicrophone {
    state: Arc<MicState>,
    sample_rate: u32,
    realtime_tap: bool,
    fail_start: bool,
}

impl InputDevice for MockMicrophone {
    fn native_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn supports_realtime_tap(&self) -> bool {
        self.realtime_tap
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        if self.fail_start {
            return Err(VoiceError::permission("input stream refused to start"));
        }
        *self.state.callback.lock() = Some(callback);
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.callback.lock().take();
        self.state.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockOutput {
    sample_rate: Option<u32>,
    now: Mutex<f64>,
    started: Mutex<Vec<(RenderRequest, CompletionHandle)>>,
    stops: AtomicUsize,
    closed: AtomicBool,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An output that renders at a fixed device rate.
    pub fn at_rate(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self { sample_rate: Some(sample_rate), ..Self::default() })
    }

    pub fn starts(&self) -> Vec<RenderRequest> {
        self.started.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().len()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_time(&self, secs: f64) {
        *self.now.lock() = secs;
    }

    /// Play render `index` to its end: advance the clock and fire its completion.
    pub fn finish(&self, index: usize) {
        let (end, done) = {
            let started = self.started.lock();
            let (request, done) = &started[index];
            (request.start_at + request.item.duration_secs(), done.clone())
        };
        self.set_time(end);
        done.complete();
    }
}

impl AudioOutput for MockOutput {
    fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn start(&self, request: RenderRequest, done: CompletionHandle) -> Result<()> {
        self.started.lock().push((request, done));
        Ok(())
    }

    fn stop_current(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MockBackend {
    pub mic: Arc<MicState>,
    pub output: Arc<MockOutput>,
    pub sample_rate: u32,
    pub realtime_tap: bool,
    deny: bool,
    fail_start: bool,
}

impl MockBackend {
    fn build(sample_rate: u32, realtime_tap: bool, deny: bool, fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            mic: Arc::new(MicState::default()),
            output: MockOutput::new(),
            sample_rate,
            realtime_tap,
            deny,
            fail_start,
        })
    }

    pub fn new() -> Arc<Self> {
        Self::build(16000, true, false, false)
    }

    /// The permission prompt is dismissed.
    pub fn denying() -> Arc<Self> {
        Self::build(16000, true, true, false)
    }

    /// The microphone is granted but its stream fails to start.
    pub fn failing_start() -> Arc<Self> {
        Self::build(16000, true, false, true)
    }

    /// A microphone with the given native rate and tap support.
    pub fn with_microphone(sample_rate: u32, realtime_tap: bool) -> Arc<Self> {
        Self::build(sample_rate, realtime_tap, false, false)
    }
}

#[async_trait]
impl AudioBackend for MockBackend {
    async fn acquire_microphone(&self) -> Result<Box<dyn InputDevice>> {
        if self.deny {
            return Err(VoiceError::permission("user dismissed the permission prompt"));
        }
        Ok(Box::new(MockMicrophone {
            state: Arc::clone(&self.mic),
            sample_rate: self.sample_rate,
            realtime_tap: self.realtime_tap,
            fail_start: self.fail_start,
        }))
    }

    async fn open_output(&self, _sample_rate: u32) -> Result<Arc<dyn AudioOutput>> {
        Ok(self.output.clone())
    }
}
