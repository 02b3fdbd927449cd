//! Named colour sets shared by the pattern effects.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{light::Hsb, LightSyncError, Result};

/// Brightness the configurable palettes are rendered at.
pub const DEFAULT_PALETTE_BRI: u8 = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaletteName {
    Warm,
    Cool,
    Neon,
    Pastel,
    #[default]
    Full,
}

impl PaletteName {
    pub const ALL: [PaletteName; 5] = [
        Self::Warm,
        Self::Cool,
        Self::Neon,
        Self::Pastel,
        Self::Full,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Cool => "cool",
            Self::Neon => "neon",
            Self::Pastel => "pastel",
            Self::Full => "full",
        }
    }

    /// Colours of this palette. Neon and pastel carry their own brightness;
    /// the others use `base_bri`.
    pub fn colors(self, base_bri: u8) -> Vec<Hsb> {
        match self {
            Self::Warm => vec![
                Hsb::new(5000, 254, base_bri),
                Hsb::new(8000, 254, base_bri),
                Hsb::new(12000, 200, base_bri),
                Hsb::new(0, 200, base_bri),
            ],
            Self::Cool => vec![
                Hsb::new(43000, 254, base_bri),
                Hsb::new(50000, 254, base_bri),
                Hsb::new(46920, 254, base_bri),
                Hsb::new(35000, 200, base_bri),
            ],
            Self::Neon => vec![
                Hsb::new(65000, 254, 254),
                Hsb::new(25500, 254, 254),
                Hsb::new(46920, 254, 254),
                Hsb::new(21845, 254, 254),
            ],
            Self::Pastel => vec![
                Hsb::new(65000, 100, 180),
                Hsb::new(25500, 100, 180),
                Hsb::new(46920, 100, 180),
                Hsb::new(21845, 100, 180),
            ],
            Self::Full => RAINBOW.iter().map(|c| c.with_bri(base_bri)).collect(),
        }
    }
}

impl fmt::Display for PaletteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PaletteName {
    type Err = LightSyncError;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|palette| palette.name() == wanted)
            .ok_or_else(|| LightSyncError::msg(format!("unknown palette `{value}`")))
    }
}

/// Six evenly spread primaries used by rainbow strobes and the full palette.
pub const RAINBOW: [Hsb; 6] = [
    Hsb::new(0, 254, 254),
    Hsb::new(10922, 254, 254),
    Hsb::new(46920, 254, 254),
    Hsb::new(21845, 254, 254),
    Hsb::new(54613, 254, 254),
    Hsb::new(32768, 254, 254),
];

pub const DISCO: [Hsb; 8] = [
    Hsb::new(0, 254, 254),
    Hsb::new(10922, 254, 254),
    Hsb::new(46920, 254, 254),
    Hsb::new(25500, 254, 254),
    Hsb::new(56100, 254, 254),
    Hsb::new(33000, 254, 254),
    Hsb::new(65000, 254, 254),
    Hsb::new(12750, 254, 254),
];

/// Fire hues. Brightness is drawn per frame.
pub const FIRE: [Hsb; 4] = [
    Hsb::new(0, 254, 254),
    Hsb::new(5000, 254, 254),
    Hsb::new(8000, 254, 254),
    Hsb::new(12000, 200, 254),
];

pub const LAVA: [Hsb; 4] = [
    Hsb::new(5000, 254, 200),
    Hsb::new(0, 254, 180),
    Hsb::new(8000, 220, 160),
    Hsb::new(12000, 200, 140),
];

pub const AURORA: [Hsb; 5] = [
    Hsb::new(46920, 200, 180),
    Hsb::new(33000, 200, 180),
    Hsb::new(10922, 180, 160),
    Hsb::new(25500, 150, 140),
    Hsb::new(56100, 180, 160),
];

/// Cascade steps from bright green to nearly dark.
pub const MATRIX: [Hsb; 4] = [
    Hsb::new(25500, 254, 254),
    Hsb::new(25500, 254, 180),
    Hsb::new(25500, 254, 100),
    Hsb::new(0, 0, 50),
];

/// Daylight to deep red.
pub const SUNSET: [Hsb; 5] = [
    Hsb::new(0, 0, 254),
    Hsb::new(5000, 100, 200),
    Hsb::new(8000, 180, 150),
    Hsb::new(0, 254, 100),
    Hsb::new(0, 254, 50),
];

pub const WHITE: Hsb = Hsb::new(0, 0, 254);

/// Maps a signal in `-1.0..=1.0` onto an index of a palette of `len` colours.
pub fn index_for(signal: f32, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let unit = if signal.is_finite() {
        ((signal + 1.0) / 2.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((unit * len as f32) as usize).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_palette_has_colors() {
        for palette in PaletteName::ALL {
            assert!(!palette.colors(DEFAULT_PALETTE_BRI).is_empty(), "{palette}");
            assert_eq!(palette.name().parse::<PaletteName>().unwrap(), palette);
        }
    }

    #[test]
    fn base_brightness_only_applies_to_unpinned_palettes() {
        assert!(PaletteName::Warm.colors(90).iter().all(|c| c.bri == 90));
        assert!(PaletteName::Neon.colors(90).iter().all(|c| c.bri == 254));
    }

    #[test]
    fn signal_index_covers_the_whole_palette() {
        assert_eq!(index_for(-1.0, 4), 0);
        assert_eq!(index_for(1.0, 4), 3);
        assert_eq!(index_for(0.0, 4), 2);
        assert_eq!(index_for(f32::NAN, 4), 0);
        assert_eq!(index_for(0.3, 0), 0);
    }
}
