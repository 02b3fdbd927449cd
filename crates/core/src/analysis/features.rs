use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use super::bands::{BandEnergies, FrequencyBandTable};
use crate::{LightSyncError, Result};

/// Frequency-domain and time-domain features of one mono frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpectralFeatures {
    pub amplitude: f32,
    /// Sum of squared samples, the input of the beat detector.
    pub energy: f32,
    pub band_energy: BandEnergies,
    pub dominant_frequency: f32,
    pub spectral_centroid: f32,
    pub zero_crossing_rate: f32,
}

/// Reusable FFT workspace. Plans are rebuilt only when the frame size changes.
pub struct FeatureExtractor {
    bands: FrequencyBandTable,
    planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
    normalized: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(bands: FrequencyBandTable) -> Self {
        Self {
            bands,
            planner: RealFftPlanner::new(),
            fft: None,
            normalized: Vec::new(),
        }
    }

    pub fn bands(&self) -> &FrequencyBandTable {
        &self.bands
    }

    pub fn extract(&mut self, samples: &[f32], sample_rate: u32) -> Result<SpectralFeatures> {
        if samples.len() < 2 {
            return Err(LightSyncError::InvalidInput(
                "feature extraction requires at least two samples",
            ));
        }
        if sample_rate == 0 {
            return Err(LightSyncError::InvalidInput(
                "feature extraction requires a positive sample rate",
            ));
        }

        self.normalized.clear();
        self.normalized.extend(samples.iter().map(|s| normalize(*s)));
        let samples = &self.normalized;

        let amplitude = compute_rms(samples);
        let energy = samples.iter().map(|s| s * s).sum();
        let zero_crossing_rate = compute_zero_crossing_rate(samples);

        let len = samples.len();
        let fft = prepare_fft(&mut self.planner, &mut self.fft, len);
        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let bin_hz = sample_rate as f32 / len as f32;
        let mut band_energy = BandEnergies::default();
        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let mut peak = (0usize, 0.0f32);

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            let freq = i as f32 * bin_hz;

            if let Some(band) = self.bands.band_of(freq) {
                band_energy.add(band, magnitude);
            }
            magnitude_sum += magnitude;
            weighted_sum += magnitude * freq;
            // the Nyquist bin is excluded from the peak search
            if i < len / 2 && magnitude > peak.1 {
                peak = (i, magnitude);
            }
        }

        let spectral_centroid = if magnitude_sum <= f32::EPSILON {
            0.0
        } else {
            weighted_sum / magnitude_sum
        };
        let dominant_frequency = if peak.1 <= f32::EPSILON {
            0.0
        } else {
            peak.0 as f32 * bin_hz
        };

        Ok(SpectralFeatures {
            amplitude,
            energy,
            band_energy,
            dominant_frequency,
            spectral_centroid,
            zero_crossing_rate,
        })
    }
}

fn prepare_fft<'a>(
    planner: &mut RealFftPlanner<f32>,
    slot: &'a mut Option<FftResources>,
    size: usize,
) -> &'a mut FftResources {
    if slot.as_ref().is_some_and(|fft| fft.size != size) {
        *slot = None;
    }

    slot.get_or_insert_with(|| {
        let plan = planner.plan_fft_forward(size);
        FftResources {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    })
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("bands", &self.bands)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

/// Maps a raw sample into `[-1, 1]`; non-finite input is treated as silence.
fn normalize(sample: f32) -> f32 {
    if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn compute_zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Band;

    const RATE: u32 = 44_100;

    fn sine(freq: f32, len: usize, gain: f32) -> Vec<f32> {
        (0..len)
            .map(|i| gain * (2.0 * PI * freq * i as f32 / RATE as f32).sin())
            .collect()
    }

    #[test]
    fn silence_has_no_features() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        let features = extractor.extract(&[0.0; 1024], RATE).unwrap();

        assert_eq!(features.amplitude, 0.0);
        assert_eq!(features.dominant_frequency, 0.0);
        assert_eq!(features.spectral_centroid, 0.0);
        assert_eq!(features.zero_crossing_rate, 0.0);
        assert_eq!(features.band_energy.total(), 0.0);
    }

    #[test]
    fn sine_peaks_in_its_own_band() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        let features = extractor.extract(&sine(440.0, 1024, 0.5), RATE).unwrap();

        let bin_hz = RATE as f32 / 1024.0;
        assert!((features.dominant_frequency - 440.0).abs() <= bin_hz);
        assert_eq!(features.band_energy.loudest(), Some(Band::LowMid));
        assert!((features.amplitude - 0.5 / 2f32.sqrt()).abs() < 0.01);
        for band in Band::ALL {
            assert!(features.band_energy.get(band) >= 0.0);
        }
    }

    #[test]
    fn centroid_follows_the_tone() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        let low = extractor.extract(&sine(200.0, 1024, 0.5), RATE).unwrap();
        let high = extractor.extract(&sine(6000.0, 1024, 0.5), RATE).unwrap();
        assert!(low.spectral_centroid < high.spectral_centroid);
        assert_eq!(high.band_energy.loudest(), Some(Band::Treble));
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        let features = extractor
            .extract(&[4.0, -4.0, f32::NAN, 4.0], RATE)
            .unwrap();
        // [1, -1, 0, 1]
        assert!((features.amplitude - (3.0f32 / 4.0).sqrt()).abs() < 1e-6);
        assert!((features.energy - 3.0).abs() < 1e-6);
    }

    #[test]
    fn zero_crossings_count_sign_changes() {
        assert_eq!(compute_zero_crossing_rate(&[1.0, -1.0, 1.0, -1.0, 1.0]), 1.0);
        assert_eq!(compute_zero_crossing_rate(&[0.5, 0.2, -0.1, -0.3, 0.0]), 0.5);
    }

    #[test]
    fn frame_size_change_replans() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        extractor.extract(&sine(440.0, 1024, 0.5), RATE).unwrap();
        extractor.extract(&sine(440.0, 512, 0.5), RATE).unwrap();
        assert_eq!(extractor.fft.as_ref().map(|fft| fft.size), Some(512));
    }

    #[test]
    fn rejects_degenerate_frames() {
        let mut extractor = FeatureExtractor::new(FrequencyBandTable::default());
        assert!(extractor.extract(&[0.1], RATE).is_err());
        assert!(extractor.extract(&[0.1, 0.2], 0).is_err());
    }
}
