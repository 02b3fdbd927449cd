//! Phase-driven patterns.
//!
//! Each frame is a pure function of elapsed time: a travelling phase plus a
//! per-target offset proportional to the target's position picks the palette
//! colour, and a second phase drives brightness. The travelling phase is
//! continuous in time for every [`Direction`], including ping-pong reversal.

use std::{f32::consts::TAU, time::Duration};

use rand::RngCore;

use super::{
    deciseconds,
    palette::{index_for, AURORA, DEFAULT_PALETTE_BRI},
    secs, Direction, Frame, FrameContext, Generator, GeneratorConfig, Step,
};
use crate::{
    light::{scale_bri, Hsb, LightCommand, LightState, TargetSelector, BRI_MAX},
    Result,
};

/// Half period of the ping-pong triangle, in phase units.
const SWING: f32 = TAU;

/// Travelling phase at `secs` for the given speed and direction.
pub(super) fn travel(secs: f32, speed: f32, direction: Direction) -> f32 {
    let x = secs * speed;
    match direction {
        Direction::Forward => x,
        Direction::Backward => -x,
        Direction::PingPong => {
            let folded = x.rem_euclid(2.0 * SWING);
            if folded < SWING {
                folded
            } else {
                2.0 * SWING - folded
            }
        }
    }
}

fn floor_bri(bri: u8, floor: u8) -> u8 {
    bri.max(floor).min(BRI_MAX)
}

fn paint(target: &TargetSelector, color: Hsb, transition: Option<u16>) -> LightCommand {
    let mut state = LightState::color(color);
    state.transition = transition;
    LightCommand::new(target.clone(), state)
}

struct Shared {
    palette: Vec<Hsb>,
    speed: f32,
    intensity: f32,
    direction: Direction,
}

impl Shared {
    fn new(config: &GeneratorConfig) -> Self {
        let mut palette = config.palette.colors(DEFAULT_PALETTE_BRI);
        if palette.is_empty() {
            palette.push(Hsb::new(0, 254, DEFAULT_PALETTE_BRI));
        }
        Self {
            palette,
            speed: config.speed,
            intensity: config.intensity,
            direction: config.direction,
        }
    }

    fn phase(&self, cx: &FrameContext<'_>) -> f32 {
        travel(cx.secs(), self.speed, self.direction)
    }

    fn pick(&self, signal: f32) -> Hsb {
        self.palette[index_for(signal, self.palette.len())]
    }
}

/// Palette colours travelling across the targets.
pub(super) struct Wave(Shared);

impl Wave {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self(Shared::new(config))
    }

    fn color_at(&self, phase: f32, index: usize) -> Hsb {
        let p = phase + index as f32 * 0.8;
        let color = self.0.pick(p.sin());
        let swell = 0.6 + 0.4 * (p * 0.5).cos();
        color.with_bri(scale_bri(color.bri, swell * self.0.intensity))
    }
}

impl Generator for Wave {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let hold = 0.2 / self.0.speed;
        let phase = self.0.phase(cx);
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| paint(target, self.color_at(phase, i), Some(deciseconds(hold))))
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(hold))))
    }
}

/// Three superimposed sines.
pub(super) struct Plasma(Shared);

impl Plasma {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self(Shared::new(config))
    }

    fn color_at(&self, phase: f32, index: usize) -> Hsb {
        let i = index as f32;
        let value =
            ((phase + i * 0.5).sin() + (phase * 1.5 + i * 0.3).sin() + (phase * 0.8 + i * 0.8).sin())
                / 3.0;
        let color = self.0.pick(value);
        let shimmer = 0.75 + 0.25 * (phase * 0.6 + i * 0.5).cos();
        color.with_bri(floor_bri(
            scale_bri(color.bri, shimmer * self.0.intensity),
            10,
        ))
    }
}

impl Generator for Plasma {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let phase = self.0.phase(cx);
        let transition = deciseconds(1.0 / self.0.speed);
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| paint(target, self.color_at(phase, i), Some(transition)))
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.1 / self.0.speed))))
    }
}

/// Spiral: targets spread evenly around one revolution.
pub(super) struct Tornado(Shared);

impl Tornado {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self(Shared::new(config))
    }

    fn color_at(&self, phase: f32, index: usize, count: usize) -> Hsb {
        let offset = phase + index as f32 * TAU / count.max(1) as f32;
        let color = self.0.pick(offset.sin());
        let spin = ((offset * 2.0).cos() + 1.0) / 2.0;
        let bri = scale_bri(color.bri, (0.3 + 0.7 * spin) * self.0.intensity);
        color.with_bri(floor_bri(bri, 30))
    }
}

impl Generator for Tornado {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let phase = self.0.phase(cx);
        let count = cx.targets.len();
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| paint(target, self.color_at(phase, i, count), None))
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.15 / self.0.speed))))
    }
}

/// Pattern mirrored around the middle of the target list.
pub(super) struct Kaleidoscope(Shared);

impl Kaleidoscope {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self(Shared::new(config))
    }

    fn color_at(&self, phase: f32, index: usize, count: usize) -> Hsb {
        let i = index as f32;
        let mirrored = count.saturating_sub(1).saturating_sub(index) as f32;
        let pattern = (phase + i * 0.5).sin() * (phase * 0.7 + i * 0.3).cos();
        let mirror = (phase + mirrored * 0.5).sin();
        let combined = (pattern + mirror) / 2.0;
        let color = self.0.pick(combined);
        let bri = scale_bri(
            color.bri,
            (0.4 + 0.6 * combined.abs()) * self.0.intensity,
        );
        color.with_bri(floor_bri(bri, 40))
    }
}

impl Generator for Kaleidoscope {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let phase = self.0.phase(cx);
        let count = cx.targets.len();
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| paint(target, self.color_at(phase, i, count), None))
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(0.12 / self.0.speed))))
    }
}

/// Slow overlapping waves over the cool aurora colours.
pub(super) struct Aurora(Shared);

impl Aurora {
    pub fn new(config: &GeneratorConfig) -> Self {
        let mut shared = Shared::new(config);
        shared.palette = AURORA.to_vec();
        Self(shared)
    }

    fn color_at(&self, phase: f32, index: usize) -> Hsb {
        let p = phase + index as f32 * 0.5;
        let w1 = p.sin();
        let w2 = (p * 1.3 + 1.0).sin();
        let w3 = (p * 0.7 + 2.0).sin();
        let color = self.0.pick((w1 + w2) / 2.0);
        let glow = ((w1 * 0.4 + w2 * 0.3 + w3 * 0.3) + 1.0) / 2.0;
        let bri = scale_bri(color.bri, glow * self.0.intensity);
        color.with_bri(floor_bri(bri, 30))
    }
}

impl Generator for Aurora {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let phase = self.0.phase(cx) * 0.5;
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| paint(target, self.color_at(phase, i), Some(30)))
            .collect();
        Ok(Step::Emit(Frame::new(commands, Duration::from_millis(200))))
    }
}

/// Shock waves expanding from the first target, one palette colour per cycle.
pub(super) struct Explosion(Shared);

impl Explosion {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self(Shared::new(config))
    }

    fn state_at(&self, secs: f32, index: usize, count: usize) -> LightState {
        let cycle_len = 3.0 / self.0.speed;
        let cycles = (secs / cycle_len).floor();
        let progress = secs / cycle_len - cycles;
        let position = match self.0.direction {
            Direction::Backward => count.saturating_sub(1).saturating_sub(index),
            _ => index,
        };
        let distance = position as f32 / count.saturating_sub(1).max(1) as f32;
        if progress < distance {
            return LightState::off();
        }

        let strength = (1.0 - (progress - distance) * 2.0).max(0.0);
        let color = self.0.palette[cycles as usize % self.0.palette.len()];
        let bri = f32::from(color.bri) * strength * self.0.intensity;
        if bri <= 30.0 {
            return LightState::off();
        }
        LightState::color(color.with_bri(scale_bri(color.bri, strength * self.0.intensity)))
    }
}

impl Generator for Explosion {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let count = cx.targets.len();
        let commands = cx
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| LightCommand::new(target.clone(), self.state_at(cx.secs(), i, count)))
            .collect();
        Ok(Step::Emit(Frame::new(commands, Duration::from_millis(100))))
    }
}

/// A bright head with a fading tail running along the targets.
pub(super) struct Comet {
    shared: Shared,
    color: Hsb,
}

const COMET_STEP: f32 = 0.3;
const COMET_TAIL: usize = 5;

impl Comet {
    pub fn new(config: &GeneratorConfig) -> Self {
        let shared = Shared::new(config);
        let color = shared.palette[0];
        Self { shared, color }
    }

    /// Head position after `steps` moves along `count` targets.
    fn head(&self, steps: usize, count: usize) -> usize {
        match self.shared.direction {
            Direction::Forward => steps % count,
            Direction::Backward => (count - 1) - steps % count,
            Direction::PingPong => {
                if count == 1 {
                    return 0;
                }
                let span = 2 * (count - 1);
                let folded = steps % span;
                if folded < count {
                    folded
                } else {
                    span - folded
                }
            }
        }
    }

    fn brightness(&self, tail_index: usize, tail_len: usize) -> u8 {
        let fade = (tail_len - tail_index) as f32 / tail_len as f32;
        floor_bri(scale_bri(self.color.bri, fade * self.shared.intensity), 10)
    }
}

impl Generator for Comet {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let count = cx.targets.len();
        if count < 2 {
            return Ok(Step::Finished);
        }

        let step_len = COMET_STEP / self.shared.speed;
        let steps = (cx.secs() / step_len).floor() as usize;
        let tail_len = COMET_TAIL.min(count);
        let mut lit = vec![None; count];
        // Walk the tail backwards in time so the head wins where they overlap.
        for age in (0..tail_len).rev() {
            if let Some(past) = steps.checked_sub(age) {
                lit[self.head(past, count)] = Some(self.brightness(age, tail_len));
            }
        }

        let commands = cx
            .targets
            .iter()
            .zip(lit)
            .map(|(target, bri)| {
                let state = match bri {
                    Some(bri) => LightState::color(self.color.with_bri(bri)),
                    None => LightState::off(),
                };
                LightCommand::new(target.clone(), state)
            })
            .collect();
        Ok(Step::Emit(Frame::new(commands, secs(step_len))))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        effects::testing,
        light::{BRI_MIN, SAT_MAX},
    };

    fn config(direction: Direction) -> GeneratorConfig {
        GeneratorConfig {
            direction,
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn ping_pong_phase_reverses_without_jumping() {
        let before = travel(SWING - 0.001, 1.0, Direction::PingPong);
        let after = travel(SWING + 0.001, 1.0, Direction::PingPong);
        assert!((before - after).abs() < 0.01);

        let wrap_before = travel(2.0 * SWING - 0.001, 1.0, Direction::PingPong);
        let wrap_after = travel(2.0 * SWING + 0.001, 1.0, Direction::PingPong);
        assert!((wrap_before - wrap_after).abs() < 0.01);
    }

    #[test]
    fn neighbouring_targets_are_offset() {
        let wave = Wave::new(&GeneratorConfig::default());
        let phase = 0.0;
        let colors: Vec<Hsb> = (0..4).map(|i| wave.color_at(phase, i)).collect();
        assert!(colors.windows(2).any(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn every_target_gets_one_command_per_frame() {
        let targets = testing::lights(5);
        let mut rng = testing::rng(9);
        let generators: Vec<Box<dyn Generator>> = vec![
            Box::new(Wave::new(&GeneratorConfig::default())),
            Box::new(Plasma::new(&GeneratorConfig::default())),
            Box::new(Tornado::new(&GeneratorConfig::default())),
            Box::new(Kaleidoscope::new(&GeneratorConfig::default())),
            Box::new(Aurora::new(&GeneratorConfig::default())),
            Box::new(Explosion::new(&GeneratorConfig::default())),
            Box::new(Comet::new(&GeneratorConfig::default())),
        ];
        for mut generator in generators {
            let frame = testing::frame_at(generator.as_mut(), 1.3, &targets, &mut rng);
            assert_eq!(frame.commands.len(), targets.len());
            assert!(!frame.hold.is_zero());
        }
    }

    #[test]
    fn explosion_reaches_far_targets_later() {
        let explosion = Explosion::new(&GeneratorConfig::default());
        let early = explosion.state_at(0.3, 4, 5);
        let first = explosion.state_at(0.3, 0, 5);
        assert_eq!(early, LightState::off());
        assert_eq!(first.on, Some(true));
    }

    #[test]
    fn comet_head_bounces_in_ping_pong_mode() {
        let comet = Comet::new(&config(Direction::PingPong));
        let path: Vec<usize> = (0..8).map(|step| comet.head(step, 4)).collect();
        assert_eq!(path, vec![0, 1, 2, 3, 2, 1, 0, 1]);

        let backward = Comet::new(&config(Direction::Backward));
        let path: Vec<usize> = (0..5).map(|step| backward.head(step, 4)).collect();
        assert_eq!(path, vec![3, 2, 1, 0, 3]);
    }

    #[test]
    fn comet_tail_fades_behind_the_head() {
        let mut comet = Comet::new(&GeneratorConfig::default());
        let targets = testing::lights(6);
        let mut rng = testing::rng(1);

        // four steps in: head on light 4, tail on 3, 2, 1, 0
        let frame = testing::frame_at(&mut comet, 1.25, &targets, &mut rng);
        let bri: Vec<Option<u8>> = frame
            .commands
            .iter()
            .map(|c| c.state.bri.filter(|_| c.state.on == Some(true)))
            .collect();

        assert!(bri[5].is_none());
        assert!(bri[4] > bri[3] && bri[3] > bri[2] && bri[2] > bri[1] && bri[1] > bri[0]);
    }

    #[test]
    fn comet_needs_two_targets() {
        let mut comet = Comet::new(&GeneratorConfig::default());
        let targets = testing::lights(1);
        let cx = FrameContext {
            elapsed: Duration::ZERO,
            selector: &TargetSelector::All,
            targets: &targets,
        };
        assert_eq!(
            comet.next_frame(&cx, &mut testing::rng(1)).unwrap(),
            Step::Finished
        );
    }

    proptest! {
        #[test]
        fn pattern_output_stays_in_device_range(
            secs in 0.0f32..600.0,
            speed in 0.1f32..5.0,
            intensity in 0.1f32..2.0,
            index in 0usize..16,
        ) {
            let config = GeneratorConfig { speed, intensity, ..GeneratorConfig::default() };
            let colors = [
                Wave::new(&config).color_at(secs, index),
                Plasma::new(&config).color_at(secs, index),
                Tornado::new(&config).color_at(secs, index, 16),
                Kaleidoscope::new(&config).color_at(secs, index, 16),
                Aurora::new(&config).color_at(secs, index),
            ];
            for color in colors {
                prop_assert!((BRI_MIN..=BRI_MAX).contains(&color.bri));
                prop_assert!(color.sat <= SAT_MAX);
            }
        }

        #[test]
        fn wave_brightness_moves_smoothly(secs in 0.0f32..600.0, index in 0usize..16) {
            let wave = Wave::new(&GeneratorConfig::default());
            let now = wave.color_at(travel(secs, 1.0, Direction::PingPong), index);
            let next = wave.color_at(travel(secs + 0.01, 1.0, Direction::PingPong), index);
            prop_assert!((i16::from(now.bri) - i16::from(next.bri)).abs() <= 2);
        }
    }
}
