use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{analysis::FrequencyBandTable, LightSyncError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub safety: SafetyLimits,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.analysis.validate()?;
        self.safety.validate()
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
    /// Capacity of the handoff queue between capture and the light bridge.
    pub queue_capacity: usize,
    pub read_backoff_ms: u64,
    /// How long `start_sync` waits for the capture thread to open the device.
    pub open_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 1024,
            channels: 1,
            queue_capacity: 8,
            read_backoff_ms: 100,
            open_timeout_ms: 2_000,
        }
    }
}

impl AudioConfig {
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Wall-clock length of one capture frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / f64::from(self.sample_rate.max(1)))
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(LightSyncError::Config("audio.sample_rate must be positive".into()));
        }
        if self.frame_size < 2 {
            return Err(LightSyncError::Config(
                "audio.frame_size must hold at least two samples".into(),
            ));
        }
        if self.channels == 0 {
            return Err(LightSyncError::Config("audio.channels must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(LightSyncError::Config(
                "audio.queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Tunables for feature extraction, beat detection and tempo estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub bands: FrequencyBandTable,
    /// Relative energy rise over the rolling baseline that counts as an onset.
    pub onset_threshold: f32,
    /// Minimum spacing between two beats in seconds.
    pub refractory_secs: f64,
    /// Frames of energy history kept by the beat detector.
    pub energy_history: usize,
    /// Beat timestamps kept by the tempo estimator.
    pub tempo_window: usize,
    pub min_tempo_beats: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bands: FrequencyBandTable::default(),
            onset_threshold: 0.3,
            refractory_secs: 0.2,
            energy_history: 43,
            tempo_window: 100,
            min_tempo_beats: 4,
            min_bpm: 60.0,
            max_bpm: 200.0,
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        self.bands.validate()?;
        if !(self.onset_threshold.is_finite() && self.onset_threshold >= 0.0) {
            return Err(LightSyncError::Config(
                "analysis.onset_threshold must be a non-negative number".into(),
            ));
        }
        if !(self.refractory_secs.is_finite() && self.refractory_secs >= 0.0) {
            return Err(LightSyncError::Config(
                "analysis.refractory_secs must be a non-negative number".into(),
            ));
        }
        // three recent frames plus at least one baseline frame
        if self.energy_history < 4 {
            return Err(LightSyncError::Config(
                "analysis.energy_history must keep at least 4 frames".into(),
            ));
        }
        if self.tempo_window < 2 || self.min_tempo_beats < 2 {
            return Err(LightSyncError::Config(
                "analysis.tempo_window and min_tempo_beats must be at least 2".into(),
            ));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm <= self.max_bpm) {
            return Err(LightSyncError::Config(
                "analysis.min_bpm must be positive and not above max_bpm".into(),
            ));
        }
        Ok(())
    }
}

/// Hard limits applied to every effect request before a generator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyLimits {
    pub strobe_min_hz: f32,
    pub strobe_max_hz: f32,
    /// Strobe frequencies above this value are logged as a photosensitivity
    /// warning.
    pub strobe_warning_hz: f32,
    pub strobe_max_secs: f32,
    pub ultra_strobe_max_secs: f32,
    pub pattern_max_secs: f32,
    pub speed_min: f32,
    pub speed_max: f32,
    pub intensity_min: f32,
    pub intensity_max: f32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            strobe_min_hz: 0.1,
            strobe_max_hz: 25.0,
            strobe_warning_hz: 15.0,
            strobe_max_secs: 300.0,
            ultra_strobe_max_secs: 60.0,
            pattern_max_secs: 300.0,
            speed_min: 0.1,
            speed_max: 5.0,
            intensity_min: 0.1,
            intensity_max: 2.0,
        }
    }
}

impl SafetyLimits {
    fn validate(&self) -> Result<()> {
        let ranges = [
            ("strobe frequency", self.strobe_min_hz, self.strobe_max_hz),
            ("speed", self.speed_min, self.speed_max),
            ("intensity", self.intensity_min, self.intensity_max),
        ];
        for (name, min, max) in ranges {
            if !(min > 0.0 && min <= max && max.is_finite()) {
                return Err(LightSyncError::Config(format!(
                    "safety {name} range {min}..{max} is invalid"
                )));
            }
        }
        let maxima = [
            self.strobe_max_secs,
            self.ultra_strobe_max_secs,
            self.pattern_max_secs,
        ];
        if maxima.iter().any(|secs| !(secs.is_finite() && *secs > 0.0)) {
            return Err(LightSyncError::Config(
                "safety duration maxima must be positive".into(),
            ));
        }
        Ok(())
    }
}
