//! Microphone capture pipeline.
//!
//! The device callback runs on a thread we do not own. It only checks the mute
//! flag, copies the block through the negotiated [`CaptureStrategy`] and hands
//! the copy to an unbounded channel. Gain, resampling and encoding happen on a
//! tokio task on the other side.

use crate::audio::AudioFrame;
use crate::codec;
use crate::config::{CaptureConfig, StrategyPreference};
use crate::error::{Result, VoiceError};
use crate::playback::AudioOutput;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Callback invoked by an input device for each block of mono samples.
///
/// The slice is only valid for the duration of the call.
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Receives encoded chunks from the pipeline.
pub type ChunkSink = Box<dyn Fn(String) + Send + Sync + 'static>;

/// An acquired microphone.
pub trait InputDevice: Send {
    /// Native sample rate of the delivered blocks.
    fn native_sample_rate(&self) -> u32;

    /// Whether the device can hand over blocks as they arrive from the hardware.
    fn supports_realtime_tap(&self) -> bool;

    /// Start delivering blocks to `callback`.
    fn start(&mut self, callback: FrameCallback) -> Result<()>;

    /// Stop delivery and release the device. No callback runs after this returns.
    fn stop(&mut self);
}

/// Source of microphone and speaker handles.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Request microphone access. Refusal is [`VoiceError::PermissionDenied`](crate::VoiceError::PermissionDenied).
    async fn acquire_microphone(&self) -> Result<Box<dyn InputDevice>>;

    /// Open the speaker for agent speech at the given source rate.
    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn AudioOutput>>;
}

// ── Strategies ──────────────────────────────────────────────────────────

/// How device blocks become frames.
pub trait CaptureStrategy: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Consume one borrowed device block, emitting zero or more owned frames.
    fn process(&mut self, block: &[f32], emit: &mut dyn FnMut(Vec<f32>));
}

/// Forwards every device block as its own frame.
#[derive(Debug, Default)]
pub struct RealtimeTap;

impl CaptureStrategy for RealtimeTap {
    fn name(&self) -> &'static str {
        "realtime_tap"
    }

    fn process(&mut self, block: &[f32], emit: &mut dyn FnMut(Vec<f32>)) {
        if !block.is_empty() {
            emit(block.to_vec());
        }
    }
}

/// Re-blocks device audio into fixed-size frames.
#[derive(Debug)]
pub struct BlockProcessor {
    block_size: usize,
    buffer: Vec<f32>,
}

impl BlockProcessor {
    /// Create a processor emitting frames of `block_size` samples.
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self { block_size, buffer: Vec::with_capacity(block_size) }
    }

    /// Samples held back waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl CaptureStrategy for BlockProcessor {
    fn name(&self) -> &'static str {
        "block_processor"
    }

    fn process(&mut self, block: &[f32], emit: &mut dyn FnMut(Vec<f32>)) {
        let mut rest = block;
        while !rest.is_empty() {
            let take = (self.block_size - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.buffer.len() == self.block_size {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.block_size));
                emit(full);
            }
        }
    }
}

/// Pick a strategy once, from the preference and the device's capabilities.
pub fn negotiate_strategy(
    preference: StrategyPreference,
    device: &dyn InputDevice,
    block_size: usize,
) -> Box<dyn CaptureStrategy> {
    match preference {
        StrategyPreference::RealtimeTap => Box::new(RealtimeTap),
        StrategyPreference::BlockProcessor => Box::new(BlockProcessor::new(block_size)),
        StrategyPreference::Auto if device.supports_realtime_tap() => Box::new(RealtimeTap),
        StrategyPreference::Auto => Box::new(BlockProcessor::new(block_size)),
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────

/// Microphone → mute gate → strategy → gain → resample → encode → sink.
///
/// [`CapturePipeline::start`] opens the device and buffers frames;
/// [`CapturePipeline::forward`] drains them to the sink in capture order.
pub struct CapturePipeline {
    device: Box<dyn InputDevice>,
    config: CaptureConfig,
    muted: Arc<AtomicBool>,
    running: bool,
    frames: Option<mpsc::UnboundedReceiver<AudioFrame>>,
    consumer: Option<JoinHandle<()>>,
    strategy_name: Option<&'static str>,
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("native_sample_rate", &self.device.native_sample_rate())
            .field("strategy", &self.strategy_name)
            .field("muted", &self.muted.load(Ordering::Relaxed))
            .field("running", &self.running)
            .field("forwarding", &self.consumer.is_some())
            .finish()
    }
}

impl CapturePipeline {
    /// Wrap an acquired microphone. `muted` is shared with the owner.
    pub fn new(device: Box<dyn InputDevice>, config: CaptureConfig, muted: Arc<AtomicBool>) -> Self {
        Self {
            device,
            config,
            muted,
            running: false,
            frames: None,
            consumer: None,
            strategy_name: None,
        }
    }

    /// Name of the negotiated strategy once started.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.strategy_name
    }

    /// Whether the device is delivering frames.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the device. Frames are held until [`CapturePipeline::forward`].
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let native_rate = self.device.native_sample_rate();
        let mut strategy =
            negotiate_strategy(self.config.strategy, self.device.as_ref(), self.config.block_size);
        let strategy_name = strategy.name();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<AudioFrame>();
        let muted = Arc::clone(&self.muted);

        let callback: FrameCallback = Box::new(move |block: &[f32]| {
            if muted.load(Ordering::Relaxed) {
                return;
            }
            strategy.process(block, &mut |samples| {
                let _ = frames_tx.send(AudioFrame::from_samples(samples, native_rate));
            });
        });

        self.device.start(callback)?;

        tracing::info!(
            strategy = strategy_name,
            native_rate,
            wire_rate = ?self.config.wire_sample_rate,
            gain = self.config.gain,
            "microphone capture started"
        );

        self.strategy_name = Some(strategy_name);
        self.frames = Some(frames_rx);
        self.running = true;
        Ok(())
    }

    /// Deliver encoded chunks to `sink` in capture order, starting with any
    /// frames buffered since [`CapturePipeline::start`].
    ///
    /// Must be called inside a tokio runtime.
    pub fn forward(&mut self, sink: ChunkSink) -> Result<()> {
        if self.consumer.is_some() {
            return Ok(());
        }
        let Some(mut frames) = self.frames.take() else {
            return Err(VoiceError::state("capture has not been started"));
        };

        let gain = self.config.gain;
        let wire_rate = self.config.wire_sample_rate;
        self.consumer = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let samples = frame.prepare(gain, wire_rate);
                if samples.is_empty() {
                    continue;
                }
                sink(codec::encode(&samples));
            }
        }));
        Ok(())
    }

    /// Stop the device and the consumer task. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.device.stop();
        self.frames = None;
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
            let _ = consumer.await;
        }
        if std::mem::take(&mut self.running) {
            tracing::info!("microphone capture stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(strategy: &mut dyn CaptureStrategy, blocks: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        for block in blocks {
            strategy.process(block, &mut |f| frames.push(f));
        }
        frames
    }

    #[test]
    fn test_realtime_tap_forwards_each_block() {
        let frames = collect(&mut RealtimeTap, &[vec![0.1; 128], vec![], vec![0.2; 128]]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 128);
        assert_eq!(frames[1][0], 0.2);
    }

    #[test]
    fn test_block_processor_reblocks_in_order() {
        let mut processor = BlockProcessor::new(4);
        let blocks = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0], vec![10.0]];
        let frames = collect(&mut processor, &blocks);

        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(processor.buffered(), 2);
    }

    struct Caps(bool);

    impl InputDevice for Caps {
        fn native_sample_rate(&self) -> u32 {
            48000
        }
        fn supports_realtime_tap(&self) -> bool {
            self.0
        }
        fn start(&mut self, _callback: FrameCallback) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    #[test]
    fn test_negotiation() {
        assert_eq!(negotiate_strategy(StrategyPreference::Auto, &Caps(true), 4096).name(), "realtime_tap");
        assert_eq!(
            negotiate_strategy(StrategyPreference::Auto, &Caps(false), 4096).name(),
            "block_processor"
        );
        assert_eq!(
            negotiate_strategy(StrategyPreference::BlockProcessor, &Caps(true), 4096).name(),
            "block_processor"
        );
        assert_eq!(
            negotiate_strategy(StrategyPreference::RealtimeTap, &Caps(false), 4096).name(),
            "realtime_tap"
        );
    }
}
