//! Audio frame types and sample utilities.

use dasp::interpolate::linear::Linear;
use dasp::{Signal, signal};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wire format for PCM audio exchanged with the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 16000, 24000).
    pub sample_rate: u32,
    /// Number of audio channels (always 1 on the wire).
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_16khz()
    }
}

impl AudioFormat {
    /// Mono 16-bit PCM at an arbitrary rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1, bits_per_sample: 16 }
    }

    /// PCM16 format at 16kHz (agent input default).
    pub fn pcm16_16khz() -> Self {
        Self::pcm16(16000)
    }

    /// PCM16 format at 24kHz.
    pub fn pcm16_24khz() -> Self {
        Self::pcm16(24000)
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Calculate duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }

    /// Parse an output format tag such as `pcm_16000`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let rate = tag.strip_prefix("pcm_")?.parse::<u32>().ok()?;
        (rate > 0).then(|| Self::pcm16(rate))
    }
}

/// One block of mono microphone samples.
///
/// Always owns its samples: device buffers are only borrowed for the duration of
/// the capture callback, so building a frame is the copy point.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Copy a borrowed device block into a new frame.
    pub fn copy_from(block: &[f32], sample_rate: u32) -> Self {
        Self { samples: block.to_vec(), sample_rate }
    }

    /// Take ownership of already-copied samples.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// The frame's samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate the frame was captured at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Apply gain and resample to the wire rate, consuming the frame.
    pub fn prepare(mut self, gain: f32, wire_rate: Option<u32>) -> Vec<f32> {
        apply_gain(&mut self.samples, gain);
        match wire_rate {
            Some(rate) if rate != self.sample_rate => resample(&self.samples, self.sample_rate, rate),
            _ => self.samples,
        }
    }
}

/// One decoded unit of agent speech.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PlaybackItem {
    /// Create a playback item from mono samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// The decoded samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate of the decoded audio.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Playback duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    /// Consume the item, returning its samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Multiply samples by `gain`, clamping the result to [-1, 1].
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

/// Average interleaved multi-channel samples down to mono.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || from_hz == 0 || to_hz == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_hz as u64).div_ceil(from_hz as u64) as usize;

    let mut source = signal::from_iter(samples.iter().copied());
    let left = source.next();
    let right = source.next();
    let interp = Linear::new(left, right);

    source.from_hz_to_hz(interp, from_hz as f64, to_hz as f64).take(out_len).collect()
}
