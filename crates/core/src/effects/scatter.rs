//! Randomised effects: each frame draws colours or targets from the effect's
//! random source.

use std::time::Duration;

use rand::{seq::index, Rng, RngCore};

use super::{
    palette::{DEFAULT_PALETTE_BRI, DISCO, FIRE, LAVA, MATRIX, WHITE},
    secs, Frame, FrameContext, Generator, GeneratorConfig, Step,
};
use crate::{
    light::{scale_bri, Hsb, LightCommand, LightState, TargetSelector},
    Result,
};

fn pick<T: Copy>(items: &[T], rng: &mut dyn RngCore) -> T {
    items[rng.random_range(0..items.len())]
}

/// Random subset of `ratio` of the targets, at least one.
fn some_targets<'a>(
    targets: &'a [TargetSelector],
    ratio: f32,
    rng: &mut dyn RngCore,
) -> Vec<&'a TargetSelector> {
    if targets.is_empty() {
        return Vec::new();
    }
    let amount = ((targets.len() as f32 * ratio) as usize).clamp(1, targets.len());
    index::sample(rng, targets.len(), amount)
        .into_iter()
        .map(|i| &targets[i])
        .collect()
}

fn palette_or_default(config: &GeneratorConfig) -> Vec<Hsb> {
    let colors = config.palette.colors(DEFAULT_PALETTE_BRI);
    if colors.is_empty() {
        vec![Hsb::new(0, 254, DEFAULT_PALETTE_BRI)]
    } else {
        colors
    }
}

/// Flickering reds and oranges.
pub(super) struct Fire {
    speed: f32,
    intensity: f32,
}

impl Fire {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            speed: config.speed,
            intensity: config.intensity,
        }
    }
}

impl Generator for Fire {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        let commands = cx
            .targets
            .iter()
            .map(|target| {
                let color = pick(&FIRE, rng);
                let bri = scale_bri(rng.random_range(100..=254), self.intensity);
                let state = LightState::color(color.with_bri(bri))
                    .with_transition(rng.random_range(1..=5));
                LightCommand::new(target.clone(), state)
            })
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.3 / self.speed))))
    }
}

/// Hard cuts between saturated colours, with the odd dark light.
pub(super) struct Disco {
    speed: f32,
    intensity: f32,
}

impl Disco {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            speed: config.speed,
            intensity: config.intensity,
        }
    }
}

impl Generator for Disco {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        let commands = cx
            .targets
            .iter()
            .map(|target| {
                let state = if rng.random_bool(0.1) {
                    LightState::off()
                } else {
                    let color = pick(&DISCO, rng);
                    let bri = scale_bri(rng.random_range(200..=254), self.intensity);
                    LightState::color(color.with_bri(bri))
                };
                LightCommand::new(target.clone(), state)
            })
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.1 / self.speed))))
    }
}

/// Random lights glint while the rest rest at a dim base colour.
pub(super) struct Twinkle {
    palette: Vec<Hsb>,
    speed: f32,
    intensity: f32,
}

impl Twinkle {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            palette: palette_or_default(config),
            speed: config.speed,
            intensity: config.intensity,
        }
    }
}

impl Generator for Twinkle {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        let twinkling = some_targets(cx.targets, 0.3, rng);
        let base = self.palette[0];
        let resting = Hsb::new(base.hue, base.sat / 2, 30);

        let commands = cx
            .targets
            .iter()
            .map(|target| {
                let state = if twinkling.contains(&target) {
                    let color = pick(&self.palette, rng);
                    let bri = scale_bri(rng.random_range(150..=254), self.intensity);
                    LightState::color(color.with_bri(bri)).with_transition(1)
                } else {
                    LightState::color(resting).with_transition(20)
                };
                LightCommand::new(target.clone(), state)
            })
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.5 / self.speed))))
    }
}

/// Short full-brightness sparks that fade back down.
pub(super) struct Sparkle {
    palette: Vec<Hsb>,
    speed: f32,
    intensity: f32,
    fading: Vec<TargetSelector>,
}

impl Sparkle {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            palette: palette_or_default(config),
            speed: config.speed,
            intensity: config.intensity,
            fading: Vec::new(),
        }
    }
}

impl Generator for Sparkle {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        if !self.fading.is_empty() {
            let commands = self
                .fading
                .drain(..)
                .map(|target| LightCommand::new(target, LightState::brightness(20).with_transition(5)))
                .collect();
            return Ok(Step::Emit(Frame::new(commands, secs(0.3 / self.speed))));
        }

        let sparks: Vec<TargetSelector> = some_targets(cx.targets, 0.2, rng)
            .into_iter()
            .cloned()
            .collect();
        let commands = sparks
            .iter()
            .map(|target| {
                let color = pick(&self.palette, rng);
                let bri = scale_bri(254, self.intensity);
                LightCommand::new(target.clone(), LightState::color(color.with_bri(bri)))
            })
            .collect();
        self.fading = sparks;
        Ok(Step::Emit(Frame::new(commands, secs(0.1 / self.speed))))
    }
}

struct Blob {
    color: Hsb,
    phase: f32,
}

/// Slowly morphing warm blobs.
pub(super) struct Lava {
    blobs: Vec<Blob>,
    speed: f32,
    intensity: f32,
}

impl Lava {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            blobs: Vec::new(),
            speed: config.speed,
            intensity: config.intensity,
        }
    }
}

impl Generator for Lava {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        if self.blobs.len() != cx.targets.len() {
            self.blobs = cx
                .targets
                .iter()
                .map(|_| Blob {
                    color: pick(&LAVA, rng),
                    phase: rng.random_range(0.0..std::f32::consts::TAU),
                })
                .collect();
        }

        let change = (0.01 * self.speed).min(1.0);
        let commands = cx
            .targets
            .iter()
            .zip(self.blobs.iter_mut())
            .map(|(target, blob)| {
                blob.phase += 0.02 * self.speed;
                if rng.random_bool(f64::from(change)) {
                    blob.color = pick(&LAVA, rng);
                }
                let swell = 0.3 + 0.7 * (blob.phase.sin() + 1.0) / 2.0;
                let bri = scale_bri(blob.color.bri, swell * self.intensity).max(30);
                LightCommand::new(
                    target.clone(),
                    LightState::color(blob.color.with_bri(bri)).with_transition(20),
                )
            })
            .collect();
        Ok(Step::Emit(Frame::new(commands, Duration::from_millis(500))))
    }
}

/// White strike on a random light, then a dim afterglow and a random pause.
pub(super) struct Lightning {
    speed: f32,
    struck: Option<TargetSelector>,
}

impl Lightning {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            speed: config.speed,
            struck: None,
        }
    }
}

impl Generator for Lightning {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        if let Some(target) = self.struck.take() {
            let pause = rng.random_range(1.0f32..3.0) / self.speed;
            let glow = LightState::brightness(30).with_transition(2);
            return Ok(Step::Emit(Frame::new(
                vec![LightCommand::new(target, glow)],
                secs(pause),
            )));
        }

        if cx.targets.is_empty() {
            return Ok(Step::Finished);
        }
        let target = pick_target(cx.targets, rng);
        self.struck = Some(target.clone());
        Ok(Step::Emit(Frame::new(
            vec![LightCommand::new(target, LightState::color(WHITE))],
            Duration::from_millis(100),
        )))
    }
}

fn pick_target(targets: &[TargetSelector], rng: &mut dyn RngCore) -> TargetSelector {
    targets[rng.random_range(0..targets.len())].clone()
}

/// Green cascades dropping down individual lights.
pub(super) struct Matrix {
    cascades: Vec<Option<usize>>,
    speed: f32,
}

impl Matrix {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            cascades: Vec::new(),
            speed: config.speed,
        }
    }
}

impl Generator for Matrix {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        if self.cascades.len() != cx.targets.len() {
            self.cascades = vec![None; cx.targets.len()];
        }

        let spawn = f64::from(0.3 * self.speed).min(1.0);
        if rng.random_bool(spawn) {
            let idle: Vec<usize> = (0..self.cascades.len())
                .filter(|&i| self.cascades[i].is_none())
                .collect();
            if !idle.is_empty() {
                self.cascades[pick(&idle, rng)] = Some(0);
            }
        }

        let mut commands = Vec::new();
        for (target, cascade) in cx.targets.iter().zip(self.cascades.iter_mut()) {
            let Some(step) = *cascade else { continue };
            let color = MATRIX[step.min(MATRIX.len() - 1)];
            let mut state = LightState::color(color);
            state.on = Some(color.bri > 50);
            state.transition = None;
            commands.push(LightCommand::new(target.clone(), state));
            *cascade = (step + 1 < MATRIX.len()).then_some(step + 1);
        }
        Ok(Step::Emit(Frame::new(commands, secs(0.2 / self.speed))))
    }
}
