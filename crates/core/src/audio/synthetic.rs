use std::{
    f64::consts::TAU,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use super::{AudioBackend, AudioFrame, FrameSource, InputDevice};
use crate::{AudioConfig, LightSyncError, Result};

/// Test signal: a steady tone with a decaying kick drum on every beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSignal {
    pub tone_hz: f64,
    pub tone_gain: f32,
    pub bpm: f64,
    pub kick_hz: f64,
    pub kick_gain: f32,
    pub kick_secs: f64,
}

impl Default for SyntheticSignal {
    fn default() -> Self {
        Self {
            tone_hz: 440.0,
            tone_gain: 0.2,
            bpm: 120.0,
            kick_hz: 60.0,
            kick_gain: 0.8,
            kick_secs: 0.05,
        }
    }
}

impl SyntheticSignal {
    fn sample(&self, t: f64) -> f32 {
        let tone = f64::from(self.tone_gain) * (TAU * self.tone_hz * t).sin();
        let kick = if self.bpm > 0.0 {
            let since_beat = t % (60.0 / self.bpm);
            if since_beat < self.kick_secs {
                let decay = 1.0 - since_beat / self.kick_secs;
                f64::from(self.kick_gain) * decay * (TAU * self.kick_hz * since_beat).sin()
            } else {
                0.0
            }
        } else {
            0.0
        };
        (tone + kick).clamp(-1.0, 1.0) as f32
    }
}

/// Backend with one virtual input device producing [`SyntheticSignal`].
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    signal: SyntheticSignal,
    paced: bool,
    fail_every: Option<u64>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self {
            signal: SyntheticSignal::default(),
            paced: true,
            fail_every: None,
        }
    }
}

impl SyntheticBackend {
    pub fn new(signal: SyntheticSignal) -> Self {
        Self {
            signal,
            ..Self::default()
        }
    }

    /// When unpaced, frames are produced as fast as they are read.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Makes every `n`th read fail with a capture error.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }
}

impl AudioBackend for SyntheticBackend {
    fn list_input_devices(&self) -> Result<Vec<InputDevice>> {
        Ok(vec![InputDevice {
            index: 0,
            name: "Synthetic test signal".to_string(),
            channels: 1,
            sample_rate: AudioConfig::default().sample_rate,
        }])
    }

    fn open_input(&self, device: Option<usize>, config: &AudioConfig) -> Result<Box<dyn FrameSource>> {
        if let Some(index) = device.filter(|index| *index != 0) {
            return Err(LightSyncError::DeviceUnavailable(format!(
                "no input device with index {index}"
            )));
        }
        Ok(Box::new(SyntheticSource {
            signal: self.signal,
            sample_rate: config.sample_rate,
            frame_size: config.frame_size,
            position: 0,
            reads: 0,
            fail_every: self.fail_every,
            started: self.paced.then(Instant::now),
        }))
    }
}

struct SyntheticSource {
    signal: SyntheticSignal,
    sample_rate: u32,
    frame_size: usize,
    position: u64,
    reads: u64,
    fail_every: Option<u64>,
    started: Option<Instant>,
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<AudioFrame> {
        self.reads += 1;
        if self.fail_every.is_some_and(|n| self.reads % n == 0) {
            return Err(LightSyncError::Capture("synthetic read failure".into()));
        }

        let rate = f64::from(self.sample_rate);
        let end = self.position + self.frame_size as u64;
        if let Some(started) = self.started {
            // block like a device would until the frame has "arrived"
            let due = started + Duration::from_secs_f64(end as f64 / rate);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let samples = (self.position..end)
            .map(|n| self.signal.sample(n as f64 / rate))
            .collect();
        let frame = AudioFrame::new(samples, self.sample_rate, 1, self.position as f64 / rate);
        self.position = end;
        Ok(frame)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::AnalysisEngine, AnalysisConfig};

    #[test]
    fn unknown_device_is_unavailable() {
        let backend = SyntheticBackend::default();
        let err = backend
            .open_input(Some(3), &AudioConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, LightSyncError::DeviceUnavailable(_)));
        assert!(backend.open_input(Some(0), &AudioConfig::default()).is_ok());
    }

    #[test]
    fn frames_advance_the_stream_clock() {
        let backend = SyntheticBackend::default().paced(false);
        let mut source = backend.open_input(None, &AudioConfig::default()).unwrap();
        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();
        assert_eq!(first.samples.len(), 1024);
        assert_eq!(first.timestamp, 0.0);
        assert!((second.timestamp - 1024.0 / 44_100.0).abs() < 1e-12);
    }

    #[test]
    fn kick_drum_yields_the_configured_tempo() {
        let backend = SyntheticBackend::default().paced(false);
        let mut source = backend.open_input(None, &AudioConfig::default()).unwrap();
        let mut analysis = AnalysisEngine::new(&AnalysisConfig::default());

        // about 6 s of audio
        let mut tempo = 0.0;
        for _ in 0..260 {
            tempo = analysis
                .process_frame(&source.read_frame().unwrap())
                .unwrap()
                .tempo_bpm;
        }
        assert!((tempo - 120.0).abs() < 8.0, "tempo {tempo}");
        assert!(analysis.summary().beats >= 8);
    }

    #[test]
    fn injected_failures_repeat() {
        let backend = SyntheticBackend::default().paced(false).failing_every(2);
        let mut source = backend.open_input(None, &AudioConfig::default()).unwrap();
        assert!(source.read_frame().is_ok());
        assert!(source.read_frame().is_err());
        assert!(source.read_frame().is_ok());
    }
}
