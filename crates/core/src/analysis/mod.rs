//! Per-frame feature extraction, beat detection and tempo estimation.

mod bands;
mod beat;
mod features;
mod tempo;

use serde::{Deserialize, Serialize};

pub use bands::{Band, BandEnergies, BandRange, FrequencyBandTable};
pub use beat::BeatDetector;
pub use features::{FeatureExtractor, SpectralFeatures};
pub use tempo::TempoEstimator;

use crate::{audio::AudioFrame, AnalysisConfig, Result};

/// Everything the light bridge learns about one captured frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Capture time in seconds since the stream started.
    pub timestamp: f64,
    /// Root-mean-square of the normalised samples.
    pub amplitude: f32,
    pub band_energy: BandEnergies,
    pub beat_detected: bool,
    /// `0.0` while the tempo is still unknown.
    pub tempo_bpm: f32,
    pub dominant_frequency: f32,
    pub spectral_centroid: f32,
    pub zero_crossing_rate: f32,
}

/// Summary of the analysis metadata accumulated so far.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub frames: u64,
    pub beats: u64,
    pub tempo_bpm: Option<f32>,
    pub duration_seconds: Option<f64>,
}

/// Synchronous analysis pipeline. Owned by the capture thread; nothing in
/// here is shared.
#[derive(Debug)]
pub struct AnalysisEngine {
    extractor: FeatureExtractor,
    beats: BeatDetector,
    tempo: TempoEstimator,
    summary: AnalysisSummary,
}

impl AnalysisEngine {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.bands.clone()),
            beats: BeatDetector::new(config),
            tempo: TempoEstimator::new(config),
            summary: AnalysisSummary::default(),
        }
    }

    /// Returns metadata collected so far about the analysed stream.
    pub fn summary(&self) -> &AnalysisSummary {
        &self.summary
    }

    /// Clears beat and tempo history while preserving configuration.
    pub fn reset(&mut self) {
        self.beats.reset();
        self.tempo.reset();
        self.summary = AnalysisSummary::default();
    }

    pub fn process_frame(&mut self, frame: &AudioFrame) -> Result<AudioFeatures> {
        if self.summary.frames > 0 && self.summary.sample_rate != frame.sample_rate {
            // history from another rate would skew the onset baseline
            self.reset();
        }

        let mono = frame.mono();
        let spectral = self.extractor.extract(&mono, frame.sample_rate)?;

        let beat_detected = self.beats.process(spectral.energy, frame.timestamp);
        if beat_detected && self.tempo.add_beat(frame.timestamp) {
            self.summary.beats += 1;
        }
        let tempo_bpm = self.tempo.bpm();

        let end = frame.timestamp + mono.len() as f64 / f64::from(frame.sample_rate);
        self.summary.sample_rate = frame.sample_rate;
        self.summary.frames += 1;
        self.summary.tempo_bpm = (tempo_bpm > 0.0).then_some(tempo_bpm);
        self.summary.duration_seconds = Some(
            self.summary
                .duration_seconds
                .map(|d| d.max(end))
                .unwrap_or(end),
        );

        Ok(AudioFeatures {
            timestamp: frame.timestamp,
            amplitude: spectral.amplitude,
            band_energy: spectral.band_energy,
            beat_detected,
            tempo_bpm,
            dominant_frequency: spectral.dominant_frequency,
            spectral_centroid: spectral.spectral_centroid,
            zero_crossing_rate: spectral.zero_crossing_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    const RATE: u32 = 44_100;
    const FRAME: usize = 1024;

    fn frame(index: usize, gain: f32) -> AudioFrame {
        let start = index * FRAME;
        let samples = (0..FRAME)
            .map(|i| gain * (2.0 * PI * 110.0 * (start + i) as f32 / RATE as f32).sin())
            .collect();
        AudioFrame::new(samples, RATE, 1, start as f64 / f64::from(RATE))
    }

    #[test]
    fn computes_basic_features() {
        let mut engine = AnalysisEngine::new(&AnalysisConfig::default());
        let features = engine
            .process_frame(&AudioFrame::new(vec![0.0; FRAME], RATE, 1, 0.0))
            .unwrap();

        assert_eq!(features.amplitude, 0.0);
        assert!(!features.beat_detected);
        assert_eq!(features.tempo_bpm, 0.0);
        assert_eq!(engine.summary().frames, 1);
    }

    #[test]
    fn louder_frames_trigger_one_beat() {
        let mut engine = AnalysisEngine::new(&AnalysisConfig::default());
        let mut beats = Vec::new();
        for i in 0..20 {
            engine.process_frame(&frame(i, 0.2)).unwrap();
        }
        // 50% louder in amplitude is 125% more energy
        for i in 20..27 {
            if engine.process_frame(&frame(i, 0.3)).unwrap().beat_detected {
                beats.push(i);
            }
        }
        assert_eq!(beats.len(), 1);
        assert_eq!(engine.summary().beats, 1);
    }

    #[test]
    fn interleaved_stereo_is_downmixed() {
        let mut engine = AnalysisEngine::new(&AnalysisConfig::default());
        let samples: Vec<f32> = (0..FRAME).flat_map(|_| [0.5, -0.5]).collect();
        let features = engine
            .process_frame(&AudioFrame::new(samples, RATE, 2, 0.0))
            .unwrap();
        assert_eq!(features.amplitude, 0.0);
        assert!((engine.summary().duration_seconds.unwrap() - FRAME as f64 / 44_100.0).abs() < 1e-9);
    }

    #[test]
    fn sample_rate_change_restarts_history() {
        let mut engine = AnalysisEngine::new(&AnalysisConfig::default());
        engine.process_frame(&frame(0, 0.2)).unwrap();
        engine
            .process_frame(&AudioFrame::new(vec![0.1; 512], 48_000, 1, 0.0))
            .unwrap();
        assert_eq!(engine.summary().sample_rate, 48_000);
        assert_eq!(engine.summary().frames, 1);
    }
}
