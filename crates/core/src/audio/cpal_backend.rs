use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Sample, SampleFormat, SizedSample,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::{AudioBackend, AudioFrame, FrameSource, InputDevice};
use crate::{AudioConfig, LightSyncError, Result};

/// Chunks buffered between the device callback and the capture thread.
const CALLBACK_QUEUE: usize = 64;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Hardware capture through the platform's default audio host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn unavailable(err: impl std::fmt::Display) -> LightSyncError {
    LightSyncError::DeviceUnavailable(err.to_string())
}

impl AudioBackend for CpalBackend {
    fn list_input_devices(&self) -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(unavailable)?;

        let mut found = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            match device.default_input_config() {
                Ok(config) => found.push(InputDevice {
                    index,
                    name,
                    channels: config.channels(),
                    sample_rate: config.sample_rate().0,
                }),
                Err(err) => debug!(index, %name, error = %err, "skipping device without input config"),
            }
        }
        Ok(found)
    }

    fn open_input(&self, device: Option<usize>, config: &AudioConfig) -> Result<Box<dyn FrameSource>> {
        let host = cpal::default_host();
        let device = match device {
            Some(index) => host
                .input_devices()
                .map_err(unavailable)?
                .nth(index)
                .ok_or_else(|| unavailable(format!("no input device with index {index}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| unavailable("no default input device"))?,
        };

        let supported = device.default_input_config().map_err(unavailable)?;
        let channels = supported.channels();
        if channels == 0 {
            return Err(unavailable("device reports zero input channels"));
        }
        let sample_rate = supported.sample_rate().0;
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunk_rx) = bounded(CALLBACK_QUEUE);
        let (error_tx, error_rx) = bounded(4);
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, chunk_tx, error_tx)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, chunk_tx, error_tx)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, chunk_tx, error_tx)?,
            other => return Err(unavailable(format!("unsupported sample format {other:?}"))),
        };
        stream.play().map_err(unavailable)?;

        Ok(Box::new(CpalSource {
            _stream: stream,
            chunks: chunk_rx,
            errors: error_rx,
            pending: Vec::new(),
            frame_len: config.frame_size * usize::from(channels),
            channels,
            sample_rate,
            position: 0,
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunks: Sender<Vec<f32>>,
    errors: Sender<String>,
) -> Result<cpal::Stream>
where
    T: Sample<Float = f32> + SizedSample + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk = data.iter().copied().map(Sample::to_float_sample).collect();
                // the device callback must never block
                let _ = chunks.try_send(chunk);
            },
            move |err| {
                let _ = errors.try_send(err.to_string());
            },
            None,
        )
        .map_err(unavailable)
}

struct CpalSource {
    _stream: cpal::Stream,
    chunks: Receiver<Vec<f32>>,
    errors: Receiver<String>,
    pending: Vec<f32>,
    frame_len: usize,
    channels: u16,
    sample_rate: u32,
    position: u64,
}

impl FrameSource for CpalSource {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        if let Ok(err) = self.errors.try_recv() {
            warn!(error = %err, "input stream reported an error");
            return Err(LightSyncError::Capture(err));
        }

        while self.pending.len() < self.frame_len {
            match self.chunks.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(LightSyncError::Capture("no audio from the input device".into()))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LightSyncError::Capture("input stream closed".into()))
                }
            }
        }

        let samples: Vec<f32> = self.pending.drain(..self.frame_len).collect();
        let timestamp = self.position as f64 / f64::from(self.sample_rate);
        self.position += (self.frame_len / usize::from(self.channels)) as u64;
        Ok(AudioFrame::new(samples, self.sample_rate, self.channels, timestamp))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
