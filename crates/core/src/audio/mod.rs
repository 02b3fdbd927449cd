//! Audio capture: device enumeration, frame sources and the capture loop.

#[cfg(feature = "capture")]
mod cpal_backend;
pub mod events;
mod synthetic;

use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(feature = "capture")]
pub use cpal_backend::CpalBackend;
pub use events::{event_queue, AudioEvent, EventPublisher, Subscriptions};
pub use synthetic::{SyntheticBackend, SyntheticSignal};

use crate::{analysis::AnalysisEngine, AudioConfig, Result};

/// One block of captured samples. Multi-channel audio is interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Stream time of the first sample in seconds.
    pub timestamp: f64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp: f64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            timestamp,
        }
    }

    /// The frame averaged down to one channel.
    pub fn mono(&self) -> Cow<'_, [f32]> {
        let channels = usize::from(self.channels.max(1));
        if channels == 1 {
            return Cow::Borrowed(&self.samples);
        }
        Cow::Owned(
            self.samples
                .chunks(channels)
                .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
                .collect(),
        )
    }
}

/// An input device as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Source of audio devices.
pub trait AudioBackend: Send + Sync {
    fn list_input_devices(&self) -> Result<Vec<InputDevice>>;

    /// Opens `device` (the default input when `None`). Fails with
    /// [`crate::LightSyncError::DeviceUnavailable`] for an unknown index or
    /// when no hardware is present.
    fn open_input(&self, device: Option<usize>, config: &AudioConfig) -> Result<Box<dyn FrameSource>>;
}

/// Blocking reader of fixed-size frames. Used only on the thread that opened it.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<AudioFrame>;

    fn sample_rate(&self) -> u32;
}

/// The backend the app uses: hardware capture when compiled in, otherwise
/// the synthetic test signal.
pub fn default_backend() -> Arc<dyn AudioBackend> {
    #[cfg(feature = "capture")]
    {
        Arc::new(CpalBackend::new())
    }
    #[cfg(not(feature = "capture"))]
    {
        Arc::new(SyntheticBackend::default())
    }
}

/// Counters shared between the capture thread and status queries.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_read: AtomicU64,
    read_errors: AtomicU64,
    events_dropped: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCounters {
    pub frames_read: u64,
    pub read_errors: u64,
    pub events_dropped: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureCounters {
        CaptureCounters {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Report dropped events once per this many.
const DROP_LOG_EVERY: u64 = 100;

/// The dedicated capture task: read, analyse, hand off. Never waits on the
/// consumer of the events it publishes.
pub struct CaptureLoop {
    source: Box<dyn FrameSource>,
    analysis: AnalysisEngine,
    publisher: EventPublisher,
    stats: Arc<CaptureStats>,
    backoff: Duration,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        analysis: AnalysisEngine,
        publisher: EventPublisher,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            source,
            analysis,
            publisher,
            stats,
            backoff: AudioConfig::default().read_backoff(),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Runs until `stop` is raised.
    pub fn run(mut self, stop: &AtomicBool) {
        info!(sample_rate = self.source.sample_rate(), "audio capture started");
        while !stop.load(Ordering::Acquire) {
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %err,
                        backoff_ms = u64::try_from(self.backoff.as_millis()).unwrap_or(u64::MAX),
                        "audio read failed, retrying"
                    );
                    std::thread::sleep(self.backoff);
                    continue;
                }
            };
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);

            let features = match self.analysis.process_frame(&frame) {
                Ok(features) => features,
                Err(err) => {
                    warn!(error = %err, "frame analysis failed, skipping frame");
                    continue;
                }
            };

            let dropped = self.publisher.publish_frame(&features);
            if dropped > 0 {
                let before = self.stats.events_dropped.fetch_add(dropped, Ordering::Relaxed);
                if before / DROP_LOG_EVERY != (before + dropped) / DROP_LOG_EVERY || before == 0 {
                    debug!(total = before + dropped, "audio events dropped, bridge is behind");
                }
            }
        }

        let counters = self.stats.snapshot();
        info!(
            frames = counters.frames_read,
            read_errors = counters.read_errors,
            dropped = counters.events_dropped,
            "audio capture stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::{AnalysisConfig, LightSyncError};

    struct Scripted {
        reads: VecDeque<Result<AudioFrame>>,
        stop: Arc<AtomicBool>,
    }

    impl FrameSource for Scripted {
        fn read_frame(&mut self) -> Result<AudioFrame> {
            let next = self
                .reads
                .pop_front()
                .unwrap_or_else(|| Err(LightSyncError::Capture("script exhausted".into())));
            if self.reads.is_empty() {
                self.stop.store(true, Ordering::Release);
            }
            next
        }

        fn sample_rate(&self) -> u32 {
            44_100
        }
    }

    fn silence(timestamp: f64) -> Result<AudioFrame> {
        Ok(AudioFrame::new(vec![0.0; 256], 44_100, 1, timestamp))
    }

    #[test]
    fn read_errors_are_counted_and_survived() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = Scripted {
            reads: VecDeque::from([
                silence(0.0),
                Err(LightSyncError::Capture("device hiccup".into())),
                silence(0.1),
            ]),
            stop: stop.clone(),
        };
        let stats = Arc::new(CaptureStats::default());
        let (publisher, rx) = event_queue(8, Subscriptions::ALL);

        CaptureLoop::new(
            Box::new(source),
            AnalysisEngine::new(&AnalysisConfig::default()),
            publisher,
            stats.clone(),
        )
        .with_backoff(Duration::from_millis(1))
        .run(&stop);

        let counters = stats.snapshot();
        assert_eq!(counters.frames_read, 2);
        assert_eq!(counters.read_errors, 1);
        // features + amplitude for each good frame
        assert_eq!(rx.try_iter().count(), 4);
    }

    #[test]
    fn stereo_frames_downmix_by_averaging() {
        let frame = AudioFrame::new(vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 44_100, 2, 0.0);
        assert_eq!(frame.mono().as_ref(), &[0.5, 0.5, 0.0]);

        let mono = AudioFrame::new(vec![0.25; 4], 44_100, 1, 0.0);
        assert!(matches!(mono.mono(), Cow::Borrowed(_)));
    }
}
