//! Contract with the light gateway.
//!
//! The core never speaks the bridge protocol. It issues [`LightState`]
//! commands against a [`TargetSelector`] through a [`LightSink`] and reads
//! back a per-light snapshot when it needs to resolve "all" into individual
//! lights.

mod memory;

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{LightSyncError, Result};

pub use memory::{MemorySink, RecordedCommand};

/// Lowest brightness a light accepts while on.
pub const BRI_MIN: u8 = 1;
/// Highest brightness a light accepts.
pub const BRI_MAX: u8 = 254;
pub const SAT_MAX: u8 = 254;
/// Number of distinct hue values; hue arithmetic wraps modulo this.
pub const HUE_SPACE: i64 = 65_536;

/// Slow fade used whenever an effect has to leave lights dark.
pub const SAFE_OFF_TRANSITION: u16 = 10;

/// Which lights a command addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    All,
    Light(String),
    Group(String),
}

impl TargetSelector {
    /// Compact form used inside effect identities.
    pub fn key(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Light(id) => format!("light-{id}"),
            Self::Group(id) => format!("group-{id}"),
        }
    }
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self::All
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Light(id) => write!(f, "light:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

impl FromStr for TargetSelector {
    type Err = LightSyncError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match value.split_once(':') {
            Some(("light", id)) if !id.is_empty() => Ok(Self::Light(id.to_string())),
            Some(("group", id)) if !id.is_empty() => Ok(Self::Group(id.to_string())),
            _ => Err(LightSyncError::msg(format!(
                "unknown target `{value}`, expected `all`, `light:<id>` or `group:<id>`"
            ))),
        }
    }
}

/// A concrete colour in the gateway's hue/saturation/brightness space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hsb {
    pub hue: u16,
    pub sat: u8,
    pub bri: u8,
}

impl Hsb {
    pub const fn new(hue: u16, sat: u8, bri: u8) -> Self {
        Self { hue, sat, bri }
    }

    pub fn with_bri(self, bri: u8) -> Self {
        Self { bri, ..self }
    }
}

/// Desired state for a target. Unset fields are left untouched by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    /// Transition time in tenths of a second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<u16>,
}

impl LightState {
    /// Turns the target on with the given colour and an instant transition.
    pub fn color(color: Hsb) -> Self {
        Self {
            on: Some(true),
            hue: Some(color.hue),
            sat: Some(color.sat),
            bri: Some(color.bri),
            transition: Some(0),
        }
    }

    /// Brightness-only update that keeps the current colour.
    pub fn brightness(bri: u8) -> Self {
        Self {
            on: Some(true),
            bri: Some(bri),
            ..Self::default()
        }
    }

    pub fn off() -> Self {
        Self {
            on: Some(false),
            transition: Some(0),
            ..Self::default()
        }
    }

    /// The state every strobe-class effect leaves behind.
    pub fn safe_off() -> Self {
        Self::off().with_transition(SAFE_OFF_TRANSITION)
    }

    pub fn with_transition(mut self, deciseconds: u16) -> Self {
        self.transition = Some(deciseconds);
        self
    }

    /// Clamps every field into the range the devices accept.
    pub fn sanitized(mut self) -> Self {
        self.bri = self.bri.map(clamp_bri);
        self.sat = self.sat.map(|sat| sat.min(SAT_MAX));
        self
    }
}

/// One command inside a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCommand {
    pub target: TargetSelector,
    pub state: LightState,
}

impl LightCommand {
    pub fn new(target: TargetSelector, state: LightState) -> Self {
        Self { target, state }
    }

    pub fn light(id: &str, state: LightState) -> Self {
        Self::new(TargetSelector::Light(id.to_string()), state)
    }
}

/// What the gateway reports about one light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSnapshot {
    pub on: bool,
    pub brightness: u8,
    pub reachable: bool,
}

/// Consumed interface of the light gateway.
///
/// Implementations must be callable from many effect threads at once.
pub trait LightSink: Send + Sync {
    /// Applies `state` to `target`. Returns [`LightSyncError::Sink`] when the
    /// command was rejected or the target is unreachable, and
    /// [`LightSyncError::MissingTarget`] when the target no longer exists.
    fn set_state(&self, target: &TargetSelector, state: &LightState) -> Result<()>;

    /// Current state of every known light keyed by light id.
    fn snapshot(&self) -> Result<BTreeMap<String, LightSnapshot>>;
}

/// Clamps a brightness into the range an "on" light accepts.
pub fn clamp_bri(bri: u8) -> u8 {
    bri.clamp(BRI_MIN, BRI_MAX)
}

/// Scales `base` by `factor` and clamps the result into the device range.
pub fn scale_bri(base: u8, factor: f32) -> u8 {
    let scaled = f32::from(base) * if factor.is_finite() { factor } else { 0.0 };
    scaled.round().clamp(f32::from(BRI_MIN), f32::from(BRI_MAX)) as u8
}

/// Wraps any integer hue into the device hue space.
pub fn wrap_hue(hue: i64) -> u16 {
    hue.rem_euclid(HUE_SPACE) as u16
}

/// Orders light ids numerically where possible so "all" resolves to a stable
/// left-to-right sequence.
pub fn sorted_light_ids(snapshot: &BTreeMap<String, LightSnapshot>) -> Vec<String> {
    let mut ids: Vec<String> = snapshot.keys().cloned().collect();
    ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    });
    ids
}
