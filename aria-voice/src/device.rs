//! Desktop audio devices through cpal.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread and is
//! torn down by a stop signal. Joining the thread guarantees the stream has been
//! dropped and its callback will not run again.

use crate::audio::{downmix, resample};
use crate::capture::{AudioBackend, FrameCallback, InputDevice};
use crate::error::{Result, VoiceError};
use crate::playback::{AudioOutput, CompletionHandle, RenderRequest};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread;

/// Audio device summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Name reported by the host.
    pub name: String,
    /// Capture device when true, playback device otherwise.
    pub is_input: bool,
    /// Whether this is the host's default device for its direction.
    pub is_default: bool,
    /// Default stream rate in Hz, when the device reports a config.
    pub sample_rate: Option<u32>,
    /// Default channel count, when the device reports a config.
    pub channels: Option<u16>,
}

/// List input and output devices on the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();

    let inputs = host.input_devices().map_err(|e| VoiceError::device(e.to_string()))?;
    for device in inputs {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = device.default_input_config().ok();
        devices.push(DeviceInfo {
            is_default: default_in.as_deref() == Some(name.as_str()),
            name,
            is_input: true,
            sample_rate: config.as_ref().map(|c| c.sample_rate().0),
            channels: config.as_ref().map(|c| c.channels()),
        });
    }

    let outputs = host.output_devices().map_err(|e| VoiceError::device(e.to_string()))?;
    for device in outputs {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = device.default_output_config().ok();
        devices.push(DeviceInfo {
            is_default: default_out.as_deref() == Some(name.as_str()),
            name,
            is_input: false,
            sample_rate: config.as_ref().map(|c| c.sample_rate().0),
            channels: config.as_ref().map(|c| c.channels()),
        });
    }

    Ok(devices)
}

/// cpal-backed microphone and speaker.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    /// Use the default devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick an input device by (partial) name.
    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    /// Pick an output device by (partial) name.
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

fn find_device(host: &cpal::Host, name: &str, input: bool) -> Option<Device> {
    let devices: Vec<Device> = if input {
        host.input_devices().ok()?.collect()
    } else {
        host.output_devices().ok()?.collect()
    };
    devices.into_iter().find(|device| {
        device.name().map(|n| n.contains(name) || name.contains(&n)).unwrap_or(false)
    })
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn acquire_microphone(&self) -> Result<Box<dyn InputDevice>> {
        let host = cpal::default_host();
        let device = match &self.input_device {
            Some(name) => find_device(&host, name, true),
            None => host.default_input_device(),
        }
        .ok_or_else(|| VoiceError::permission("no input device available"))?;

        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::permission(format!("input device refused: {}", e)))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!(device = %name, sample_rate = supported.sample_rate().0, channels = supported.channels(), "microphone acquired");

        Ok(Box::new(CpalMicrophone {
            device: Some(device),
            sample_format: supported.sample_format(),
            config: supported.config(),
            worker: None,
        }))
    }

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn AudioOutput>> {
        let host = cpal::default_host();
        let device = match &self.output_device {
            Some(name) => find_device(&host, name, false),
            None => host.default_output_device(),
        }
        .ok_or_else(|| VoiceError::device("no output device available"))?;

        let output = CpalOutput::open(device, sample_rate)?;
        Ok(Arc::new(output))
    }
}

// ── Microphone ──────────────────────────────────────────────────────────

struct StreamWorker {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl StreamWorker {
    fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("audio thread panicked");
        }
    }
}

/// Spawn a thread owning a stream built by `build`, returning once it is playing.
fn spawn_stream<F>(name: &str, build: F) -> Result<StreamWorker>
where
    F: FnOnce() -> Result<Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
    let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = bounded(1);

    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream.play().map_err(|e| VoiceError::device(format!("failed to start stream: {}", e)))?;
                Ok(stream)
            }) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| VoiceError::device(format!("failed to spawn audio thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamWorker { stop_tx, handle }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(VoiceError::device("audio thread exited before starting"))
        }
    }
}

struct CpalMicrophone {
    device: Option<Device>,
    sample_format: SampleFormat,
    config: StreamConfig,
    worker: Option<StreamWorker>,
}

fn build_input<T>(device: &Device, config: &StreamConfig, mut callback: FrameCallback) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                callback(&downmix(&samples, channels));
            },
            |err| tracing::error!(error = %err, "input stream error"),
            None,
        )
        .map_err(|e| VoiceError::permission(format!("failed to open input stream: {}", e)))
}

impl InputDevice for CpalMicrophone {
    fn native_sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn supports_realtime_tap(&self) -> bool {
        true
    }

    fn start(&mut self, callback: FrameCallback) -> Result<()> {
        let device = self.device.take().ok_or_else(|| VoiceError::state("microphone already started"))?;
        let config = self.config.clone();
        let format = self.sample_format;

        let worker = spawn_stream("aria-microphone", move || match format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, callback),
            SampleFormat::I16 => build_input::<i16>(&device, &config, callback),
            SampleFormat::U16 => build_input::<u16>(&device, &config, callback),
            other => Err(VoiceError::device(format!("unsupported input sample format {:?}", other))),
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!("microphone released");
        }
        self.device = None;
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Speaker ─────────────────────────────────────────────────────────────

struct ActiveRender {
    samples: Vec<f32>,
    /// Silent frames still owed before the first sample.
    lead: usize,
    position: usize,
    done: CompletionHandle,
}

impl ActiveRender {
    fn next_sample(&mut self) -> f32 {
        if self.lead > 0 {
            self.lead -= 1;
            return 0.0;
        }
        let value = self.samples.get(self.position).copied().unwrap_or(0.0);
        self.position += 1;
        value
    }

    fn is_finished(&self) -> bool {
        self.lead == 0 && self.position >= self.samples.len()
    }
}

#[derive(Default)]
struct OutputState {
    current: Option<ActiveRender>,
    frames_played: u64,
}

/// Speaker output rendering one item at a time.
pub struct CpalOutput {
    device_rate: u32,
    source_rate: u32,
    state: Arc<Mutex<OutputState>>,
    worker: Mutex<Option<StreamWorker>>,
}

impl std::fmt::Debug for CpalOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalOutput")
            .field("device_rate", &self.device_rate)
            .field("source_rate", &self.source_rate)
            .finish()
    }
}

impl CpalOutput {
    fn open(device: Device, source_rate: u32) -> Result<Self> {
        let supported = device
            .default_output_config()
            .map_err(|e| VoiceError::device(format!("output device refused: {}", e)))?;
        let format = supported.sample_format();
        let config = supported.config();
        let device_rate = config.sample_rate.0;

        let state = Arc::new(Mutex::new(OutputState::default()));
        let shared = Arc::clone(&state);

        let worker = spawn_stream("aria-speaker", move || match format {
            SampleFormat::F32 => build_output::<f32>(&device, &config, shared),
            SampleFormat::I16 => build_output::<i16>(&device, &config, shared),
            SampleFormat::U16 => build_output::<u16>(&device, &config, shared),
            other => Err(VoiceError::device(format!("unsupported output sample format {:?}", other))),
        })?;

        tracing::info!(device_rate, source_rate, "speaker opened");

        Ok(Self { device_rate, source_rate, state, worker: Mutex::new(Some(worker)) })
    }
}

fn build_output<T>(device: &Device, config: &StreamConfig, state: Arc<Mutex<OutputState>>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| fill_output(data, channels, &state),
            |err| tracing::error!(error = %err, "output stream error"),
            None,
        )
        .map_err(|e| VoiceError::device(format!("failed to open output stream: {}", e)))
}

fn fill_output<T>(data: &mut [T], channels: usize, state: &Mutex<OutputState>)
where
    T: SizedSample + FromSample<f32>,
{
    let mut frames = data.chunks_mut(channels.max(1));
    loop {
        let finished = {
            let mut guard = state.lock();
            let mut finished = None;
            for frame in frames.by_ref() {
                let value = guard.current.as_mut().map_or(0.0, ActiveRender::next_sample);
                for out in frame.iter_mut() {
                    *out = T::from_sample(value);
                }
                guard.frames_played += 1;

                let ended = guard.current.as_ref().is_some_and(ActiveRender::is_finished);
                if ended {
                    finished = guard.current.take().map(|r| r.done);
                    break;
                }
            }
            finished
        };

        match finished {
            // Completion may start the next item; keep filling this buffer with it.
            Some(done) => done.complete(),
            None => return,
        }
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> Option<u32> {
        Some(self.device_rate)
    }

    fn current_time(&self) -> f64 {
        self.state.lock().frames_played as f64 / self.device_rate as f64
    }

    fn start(&self, request: RenderRequest, done: CompletionHandle) -> Result<()> {
        // The queue resamples to `sample_rate()`; this only runs for other callers.
        let item_rate = request.item.sample_rate();
        let samples = if item_rate == self.device_rate {
            request.item.into_samples()
        } else {
            resample(request.item.samples(), item_rate, self.device_rate)
        };

        let mut state = self.state.lock();
        let now = state.frames_played as f64 / self.device_rate as f64;
        let lead = ((request.start_at - now).max(0.0) * self.device_rate as f64) as usize;
        state.current = Some(ActiveRender { samples, lead, position: 0, done });
        Ok(())
    }

    fn stop_current(&self) {
        self.state.lock().current = None;
    }

    fn close(&self) {
        self.stop_current();
        if let Some(worker) = self.worker.lock().take() {
            worker.shutdown();
            tracing::debug!("speaker released");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_json_fields() {
        let info = DeviceInfo {
            name: "USB Headset".to_string(),
            is_input: true,
            is_default: false,
            sample_rate: Some(48000),
            channels: None,
        };
        let value = serde_json::to_value(&info).unwrap();

        assert_eq!(value["name"], "USB Headset");
        assert_eq!(value["is_input"], true);
        assert_eq!(value["is_default"], false);
        assert_eq!(value["sample_rate"], 48000);
        assert!(value["channels"].is_null());
    }
}
