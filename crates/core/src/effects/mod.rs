//! Lighting pattern generators.
//!
//! Every effect kind is a [`Generator`]: given the elapsed time, the resolved
//! targets and a random source it produces the next [`Frame`] of commands and
//! how long to hold it. Generators never sleep or touch the gateway
//! themselves; [`runner`] owns timing, cancellation and dispatch, so each
//! generator can be stepped directly in tests.

mod ambient;
pub mod custom;
mod oscillating;
pub mod palette;
pub(crate) mod runner;
mod scatter;
mod strobe;

use std::{fmt, str::FromStr, time::Duration};

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    light::{Hsb, LightCommand, TargetSelector, BRI_MAX, BRI_MIN, SAT_MAX},
    EffectId, LightSyncError, Result, SafetyLimits,
};

pub use custom::{CustomEffect, EffectStep, LoopCount, StepAction, ValidationReport};
pub use palette::PaletteName;
pub use strobe::StrobeTiming;

/// Every effect the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Strobe,
    UltraStrobe,
    Colorloop,
    Rainbow,
    Pulse,
    Breathe,
    Sunset,
    Wave,
    Plasma,
    Tornado,
    Kaleidoscope,
    Aurora,
    Explosion,
    Comet,
    Fire,
    Disco,
    Twinkle,
    Sparkle,
    Lava,
    Lightning,
    Matrix,
    Custom,
    /// Live audio sync session. Driven by audio events instead of a
    /// generator, but admitted and cancelled like any other effect.
    AudioSync,
}

impl EffectKind {
    /// Kinds that can be started through [`crate::EffectEngine::start`].
    pub const GENERATED: [EffectKind; 22] = [
        Self::Strobe,
        Self::UltraStrobe,
        Self::Colorloop,
        Self::Rainbow,
        Self::Pulse,
        Self::Breathe,
        Self::Sunset,
        Self::Wave,
        Self::Plasma,
        Self::Tornado,
        Self::Kaleidoscope,
        Self::Aurora,
        Self::Explosion,
        Self::Comet,
        Self::Fire,
        Self::Disco,
        Self::Twinkle,
        Self::Sparkle,
        Self::Lava,
        Self::Lightning,
        Self::Matrix,
        Self::Custom,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Strobe => "strobe",
            Self::UltraStrobe => "ultra_strobe",
            Self::Colorloop => "colorloop",
            Self::Rainbow => "rainbow",
            Self::Pulse => "pulse",
            Self::Breathe => "breathe",
            Self::Sunset => "sunset",
            Self::Wave => "wave",
            Self::Plasma => "plasma",
            Self::Tornado => "tornado",
            Self::Kaleidoscope => "kaleidoscope",
            Self::Aurora => "aurora",
            Self::Explosion => "explosion",
            Self::Comet => "comet",
            Self::Fire => "fire",
            Self::Disco => "disco",
            Self::Twinkle => "twinkle",
            Self::Sparkle => "sparkle",
            Self::Lava => "lava",
            Self::Lightning => "lightning",
            Self::Matrix => "matrix",
            Self::Custom => "custom",
            Self::AudioSync => "audio_sync",
        }
    }

    /// Flashing effects. They obey the strobe frequency clamp and always
    /// leave their targets off with a slow fade.
    pub fn is_strobe_class(self) -> bool {
        matches!(self, Self::Strobe | Self::UltraStrobe)
    }

    /// Longest bounded run allowed for this kind.
    pub fn max_duration_secs(self, limits: &SafetyLimits) -> f32 {
        match self {
            Self::Strobe => limits.strobe_max_secs,
            Self::UltraStrobe => limits.ultra_strobe_max_secs,
            _ => limits.pattern_max_secs,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = LightSyncError;

    fn from_str(value: &str) -> Result<Self> {
        let wanted = value.trim().replace('-', "_").to_ascii_lowercase();
        Self::GENERATED
            .iter()
            .chain(std::iter::once(&Self::AudioSync))
            .copied()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| LightSyncError::msg(format!("unknown effect kind `{value}`")))
    }
}

/// A parameter that is either pinned or drawn from the effect's random source
/// every time it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue<T> {
    Fixed(T),
    Random,
}

impl<T> From<T> for ParamValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

impl ParamValue<u16> {
    pub fn resolve(&self, rng: &mut dyn RngCore) -> u16 {
        match self {
            Self::Fixed(value) => *value,
            Self::Random => rng.random_range(0..=u16::MAX),
        }
    }
}

/// Colour request whose hue may be random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSpec {
    pub hue: ParamValue<u16>,
    pub sat: u8,
    pub bri: u8,
}

impl Default for ColorSpec {
    fn default() -> Self {
        Self {
            hue: ParamValue::Fixed(0),
            sat: SAT_MAX,
            bri: BRI_MAX,
        }
    }
}

impl ColorSpec {
    pub fn fixed(color: Hsb) -> Self {
        Self {
            hue: ParamValue::Fixed(color.hue),
            sat: color.sat,
            bri: color.bri,
        }
    }

    pub fn resolve(&self, rng: &mut dyn RngCore) -> Hsb {
        Hsb::new(self.hue.resolve(rng), self.sat, self.bri)
    }

    fn sanitized(self) -> Self {
        Self {
            hue: self.hue,
            sat: self.sat.min(SAT_MAX),
            bri: self.bri.clamp(BRI_MIN, BRI_MAX),
        }
    }
}

/// Direction in which travelling patterns move across the target list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
    #[serde(alias = "oscillating")]
    PingPong,
}

impl FromStr for Direction {
    type Err = LightSyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            "ping_pong" | "ping-pong" | "oscillating" => Ok(Self::PingPong),
            other => Err(LightSyncError::msg(format!("unknown direction `{other}`"))),
        }
    }
}

/// Colour sequence of the classic strobe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrobeMode {
    #[default]
    Single,
    Multi,
    Rainbow,
}

/// Flash pattern of the ultra strobe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UltraMode {
    #[default]
    Ultra,
    Burst,
    Police,
    DiscoFlash,
}

impl StrobeMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Rainbow => "rainbow",
        }
    }
}

impl UltraMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Ultra => "ultra",
            Self::Burst => "burst",
            Self::Police => "police",
            Self::DiscoFlash => "disco_flash",
        }
    }
}

/// Parameters of one effect invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub target: TargetSelector,
    /// Run time in seconds. Zero runs until cancelled.
    pub duration_secs: f32,
    /// Flash frequency of strobe-class effects.
    pub frequency_hz: f32,
    /// Tempo multiplier for pattern effects. Larger is faster.
    pub speed: f32,
    /// Brightness multiplier.
    pub intensity: f32,
    pub color: ColorSpec,
    /// Colour list for [`StrobeMode::Multi`].
    pub colors: Vec<ColorSpec>,
    pub palette: PaletteName,
    pub direction: Direction,
    pub strobe_mode: StrobeMode,
    pub ultra_mode: UltraMode,
    /// Step program for [`EffectKind::Custom`].
    pub program: Option<CustomEffect>,
    /// Seed for the effect's random source. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            target: TargetSelector::All,
            duration_secs: 60.0,
            frequency_hz: 2.0,
            speed: 1.0,
            intensity: 1.0,
            color: ColorSpec::default(),
            colors: Vec::new(),
            palette: PaletteName::Full,
            direction: Direction::Forward,
            strobe_mode: StrobeMode::Single,
            ultra_mode: UltraMode::Ultra,
            program: None,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    /// `None` for unbounded effects.
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0.0).then(|| Duration::from_secs_f32(self.duration_secs))
    }

    /// Applies the safety clamps for `kind`.
    pub fn sanitized(mut self, kind: EffectKind, limits: &SafetyLimits) -> Self {
        self.duration_secs = if self.duration_secs.is_finite() && self.duration_secs > 0.0 {
            self.duration_secs.min(kind.max_duration_secs(limits))
        } else {
            0.0
        };

        if kind.is_strobe_class() {
            let requested = if self.frequency_hz.is_finite() {
                self.frequency_hz
            } else {
                limits.strobe_min_hz
            };
            self.frequency_hz = requested.clamp(limits.strobe_min_hz, limits.strobe_max_hz);
            if self.frequency_hz > limits.strobe_warning_hz {
                warn!(
                    frequency_hz = self.frequency_hz,
                    "strobe above {} Hz: photosensitivity warning", limits.strobe_warning_hz
                );
            }
        }

        self.speed = clamp_or(self.speed, limits.speed_min, limits.speed_max, 1.0);
        self.intensity = clamp_or(self.intensity, limits.intensity_min, limits.intensity_max, 1.0);
        self.color = self.color.sanitized();
        self.colors = self.colors.into_iter().map(ColorSpec::sanitized).collect();
        self
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback.clamp(min, max)
    }
}

/// Derives the single-instance key of an effect from its kind, target and
/// distinguishing parameters.
pub fn effect_id(kind: EffectKind, config: &GeneratorConfig) -> EffectId {
    let target = config.target.key();
    // Strobe-class configs arrive clamped to the safety range; for anything
    // else the saturating cast maps NaN and negatives to 0.
    let tenth_hz = (config.frequency_hz * 10.0).round() as u32;
    let id = match kind {
        EffectKind::Strobe => format!(
            "strobe_{}_{target}_{tenth_hz}",
            config.strobe_mode.name()
        ),
        EffectKind::UltraStrobe => format!(
            "ultra_strobe_{}_{target}_{tenth_hz}",
            config.ultra_mode.name()
        ),
        EffectKind::Custom => {
            let name = config
                .program
                .as_ref()
                .map(|program| slug(&program.name))
                .unwrap_or_default();
            format!("custom_{name}_{target}")
        }
        other => format!("{}_{target}", other.name()),
    };
    EffectId::new(id)
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Commands to emit now and how long to keep them before the next frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub commands: Vec<LightCommand>,
    pub hold: Duration,
}

impl Frame {
    pub fn new(commands: Vec<LightCommand>, hold: Duration) -> Self {
        Self { commands, hold }
    }

    /// A frame that emits nothing and just waits.
    pub fn idle(hold: Duration) -> Self {
        Self::new(Vec::new(), hold)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Emit(Frame),
    /// The generator has nothing left to do.
    Finished,
}

/// What a generator may look at when producing a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub elapsed: Duration,
    /// The selector the effect was started on.
    pub selector: &'a TargetSelector,
    /// `selector` expanded into individually addressable targets, in
    /// position order.
    pub targets: &'a [TargetSelector],
}

impl FrameContext<'_> {
    pub fn secs(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

/// Uniform interface of every pattern: configuration in, frame stream out.
pub trait Generator: Send {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step>;
}

/// Builds the generator for an already sanitised configuration.
pub fn build_generator(kind: EffectKind, config: &GeneratorConfig) -> Result<Box<dyn Generator>> {
    let generator: Box<dyn Generator> = match kind {
        EffectKind::Strobe => Box::new(strobe::Strobe::new(config)),
        EffectKind::UltraStrobe => Box::new(strobe::UltraStrobe::new(config)),
        EffectKind::Colorloop => Box::new(ambient::Colorloop::new(config)),
        EffectKind::Rainbow => Box::new(ambient::Rainbow::new(config)),
        EffectKind::Pulse => Box::new(ambient::Pulse::new(config)),
        EffectKind::Breathe => Box::new(ambient::Breathe::new(config)),
        EffectKind::Sunset => Box::new(ambient::Sunset::new(config)),
        EffectKind::Wave => Box::new(oscillating::Wave::new(config)),
        EffectKind::Plasma => Box::new(oscillating::Plasma::new(config)),
        EffectKind::Tornado => Box::new(oscillating::Tornado::new(config)),
        EffectKind::Kaleidoscope => Box::new(oscillating::Kaleidoscope::new(config)),
        EffectKind::Aurora => Box::new(oscillating::Aurora::new(config)),
        EffectKind::Explosion => Box::new(oscillating::Explosion::new(config)),
        EffectKind::Comet => Box::new(oscillating::Comet::new(config)),
        EffectKind::Fire => Box::new(scatter::Fire::new(config)),
        EffectKind::Disco => Box::new(scatter::Disco::new(config)),
        EffectKind::Twinkle => Box::new(scatter::Twinkle::new(config)),
        EffectKind::Sparkle => Box::new(scatter::Sparkle::new(config)),
        EffectKind::Lava => Box::new(scatter::Lava::new(config)),
        EffectKind::Lightning => Box::new(scatter::Lightning::new(config)),
        EffectKind::Matrix => Box::new(scatter::Matrix::new(config)),
        EffectKind::Custom => {
            let program = config
                .program
                .clone()
                .ok_or(LightSyncError::InvalidInput("custom effect needs a step program"))?;
            let report = program.validate();
            if !report.valid() {
                return Err(LightSyncError::msg(format!(
                    "custom effect `{}` is invalid: {}",
                    program.name,
                    report.issues.join("; ")
                )));
            }
            Box::new(custom::Sequence::new(program))
        }
        EffectKind::AudioSync => {
            return Err(LightSyncError::InvalidInput(
                "audio sync is started through the audio sync control surface",
            ))
        }
    };
    Ok(generator)
}

/// Converts seconds into a hold duration, treating junk as zero.
pub(crate) fn secs(value: f32) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f32(value)
    } else {
        Duration::ZERO
    }
}

/// Transition time in tenths of a second for a hold of `seconds`.
pub(crate) fn deciseconds(seconds: f32) -> u16 {
    (seconds * 10.0).round().clamp(0.0, f32::from(u16::MAX)) as u16
}
