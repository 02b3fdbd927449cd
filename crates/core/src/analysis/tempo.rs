use std::collections::VecDeque;

use crate::AnalysisConfig;

/// Median-interval tempo estimate over a bounded window of beat timestamps.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    beats: VecDeque<f64>,
    window: usize,
    min_beats: usize,
    min_bpm: f32,
    max_bpm: f32,
}

impl TempoEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        let window = config.tempo_window.max(2);
        Self {
            beats: VecDeque::with_capacity(window),
            window,
            min_beats: config.min_tempo_beats.max(2),
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
        }
    }

    /// Records a beat. Timestamps that do not move forward are ignored and
    /// reported as `false`.
    pub fn add_beat(&mut self, timestamp: f64) -> bool {
        if !timestamp.is_finite() || self.beats.back().is_some_and(|last| timestamp <= *last) {
            return false;
        }
        if self.beats.len() == self.window {
            self.beats.pop_front();
        }
        self.beats.push_back(timestamp);
        true
    }

    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    /// Beats per minute, or `0.0` while fewer than the configured minimum of
    /// beats has been recorded.
    pub fn bpm(&self) -> f32 {
        if self.beats.len() < self.min_beats {
            return 0.0;
        }

        let mut intervals: Vec<f64> = self
            .beats
            .iter()
            .zip(self.beats.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        intervals.sort_by(f64::total_cmp);

        let mid = intervals.len() / 2;
        let median = if intervals.len() % 2 == 0 {
            (intervals[mid - 1] + intervals[mid]) * 0.5
        } else {
            intervals[mid]
        };
        if median <= 0.0 {
            return 0.0;
        }

        ((60.0 / median) as f32).clamp(self.min_bpm, self.max_bpm)
    }

    pub fn reset(&mut self) {
        self.beats.clear();
    }
}
