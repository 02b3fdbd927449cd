use std::collections::VecDeque;

use crate::AnalysisConfig;

/// Frames averaged for the "recent" side of the onset comparison.
const RECENT_FRAMES: usize = 3;
/// History needed before any beat can fire.
const WARMUP_FRAMES: usize = 10;

/// Energy-history onset detector with a refractory period.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    history: VecDeque<f32>,
    capacity: usize,
    onset_threshold: f32,
    refractory_secs: f64,
    last_beat: Option<f64>,
}

impl BeatDetector {
    pub fn new(config: &AnalysisConfig) -> Self {
        let capacity = config.energy_history.max(RECENT_FRAMES + 1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            onset_threshold: config.onset_threshold,
            refractory_secs: config.refractory_secs,
            last_beat: None,
        }
    }

    /// Records the energy of the frame captured at `timestamp` (seconds) and
    /// returns whether it completes a beat.
    pub fn process(&mut self, energy: f32, timestamp: f64) -> bool {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(if energy.is_finite() { energy.max(0.0) } else { 0.0 });

        if self.history.len() < WARMUP_FRAMES.min(self.capacity) {
            return false;
        }

        let split = self.history.len() - RECENT_FRAMES;
        let recent = self.history.range(split..).sum::<f32>() / RECENT_FRAMES as f32;
        let baseline = self.history.range(..split).sum::<f32>() / split as f32;
        let onset = recent > baseline * (1.0 + self.onset_threshold);

        let rested = self
            .last_beat
            .map(|last| timestamp - last >= self.refractory_secs)
            .unwrap_or(true);

        if onset && rested {
            self.last_beat = Some(timestamp);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_beat = None;
    }
}
