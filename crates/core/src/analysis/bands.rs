use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{LightSyncError, Result};

/// Named frequency bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Bass,
    LowMid,
    Mid,
    HighMid,
    Treble,
}

impl Band {
    pub const ALL: [Band; 5] = [
        Self::Bass,
        Self::LowMid,
        Self::Mid,
        Self::HighMid,
        Self::Treble,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Bass => "bass",
            Self::LowMid => "low_mid",
            Self::Mid => "mid",
            Self::HighMid => "high_mid",
            Self::Treble => "treble",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Half-open interval `low_hz..high_hz`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandRange {
    pub low_hz: f32,
    pub high_hz: f32,
}

impl BandRange {
    pub const fn new(low_hz: f32, high_hz: f32) -> Self {
        Self { low_hz, high_hz }
    }

    pub fn contains(&self, hz: f32) -> bool {
        self.low_hz <= hz && hz < self.high_hz
    }

    fn overlaps(&self, other: &BandRange) -> bool {
        self.low_hz < other.high_hz && other.low_hz < self.high_hz
    }
}

/// Frequency interval of every named band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyBandTable {
    pub bass: BandRange,
    pub low_mid: BandRange,
    pub mid: BandRange,
    pub high_mid: BandRange,
    pub treble: BandRange,
}

impl Default for FrequencyBandTable {
    fn default() -> Self {
        Self {
            bass: BandRange::new(20.0, 250.0),
            low_mid: BandRange::new(250.0, 500.0),
            mid: BandRange::new(500.0, 2000.0),
            high_mid: BandRange::new(2000.0, 4000.0),
            treble: BandRange::new(4000.0, 20_000.0),
        }
    }
}

impl FrequencyBandTable {
    pub fn range(&self, band: Band) -> BandRange {
        match band {
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::Treble => self.treble,
        }
    }

    /// The band `hz` falls into, if any.
    pub fn band_of(&self, hz: f32) -> Option<Band> {
        Band::ALL
            .into_iter()
            .find(|band| self.range(*band).contains(hz))
    }

    /// Rejects empty, negative or overlapping intervals.
    pub fn validate(&self) -> Result<()> {
        for band in Band::ALL {
            let range = self.range(band);
            if !(range.low_hz.is_finite() && range.high_hz.is_finite())
                || range.low_hz < 0.0
                || range.low_hz >= range.high_hz
            {
                return Err(LightSyncError::Config(format!(
                    "band {band} has an empty or invalid range {}..{}",
                    range.low_hz, range.high_hz
                )));
            }
        }
        for (i, a) in Band::ALL.iter().enumerate() {
            for b in &Band::ALL[i + 1..] {
                if self.range(*a).overlaps(&self.range(*b)) {
                    return Err(LightSyncError::Config(format!(
                        "bands {a} and {b} overlap"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Summed spectral magnitude per band for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub treble: f32,
}

impl BandEnergies {
    pub fn get(&self, band: Band) -> f32 {
        match band {
            Band::Bass => self.bass,
            Band::LowMid => self.low_mid,
            Band::Mid => self.mid,
            Band::HighMid => self.high_mid,
            Band::Treble => self.treble,
        }
    }

    pub(crate) fn add(&mut self, band: Band, magnitude: f32) {
        let slot = match band {
            Band::Bass => &mut self.bass,
            Band::LowMid => &mut self.low_mid,
            Band::Mid => &mut self.mid,
            Band::HighMid => &mut self.high_mid,
            Band::Treble => &mut self.treble,
        };
        *slot += magnitude;
    }

    pub fn total(&self) -> f32 {
        Band::ALL.iter().map(|band| self.get(*band)).sum()
    }

    /// The band with the most energy, or `None` when every band is silent.
    pub fn loudest(&self) -> Option<Band> {
        Band::ALL
            .into_iter()
            .filter(|band| self.get(*band) > 0.0)
            .max_by(|a, b| self.get(*a).total_cmp(&self.get(*b)))
    }
}
