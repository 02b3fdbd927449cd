//! Whole-target effects: every light shows the same state.

use std::time::Duration;

use rand::RngCore;

use super::{
    deciseconds,
    palette::{DEFAULT_PALETTE_BRI, SUNSET},
    secs, Frame, FrameContext, Generator, GeneratorConfig, ParamValue, Step,
};
use crate::{
    light::{scale_bri, wrap_hue, Hsb, LightCommand, LightState, BRI_MAX},
    Result,
};

const SUNSET_PHASE_DEFAULT: Duration = Duration::from_secs(60);

fn whole(cx: &FrameContext<'_>, state: LightState, hold: Duration) -> Step {
    Step::Emit(Frame::new(
        vec![LightCommand::new(cx.selector.clone(), state)],
        hold,
    ))
}

/// Walks the hue wheel in small steps.
pub(super) struct Colorloop {
    start: ParamValue<u16>,
    hue: Option<i64>,
    bri: u8,
    hold: f32,
}

impl Colorloop {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            start: config.color.hue,
            hue: None,
            bri: scale_bri(BRI_MAX, config.intensity),
            hold: 0.1 / config.speed,
        }
    }
}

impl Generator for Colorloop {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        let hue = match self.hue {
            Some(hue) => hue,
            None => i64::from(self.start.resolve(rng)),
        };
        self.hue = Some(hue + 1000);
        let color = Hsb::new(wrap_hue(hue), 254, self.bri);
        Ok(whole(
            cx,
            LightState::color(color).with_transition(1),
            secs(self.hold),
        ))
    }
}

/// Slow hue sweep with long crossfades.
pub(super) struct Rainbow {
    hue: i64,
    bri: u8,
    hold: f32,
}

impl Rainbow {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            hue: 0,
            bri: scale_bri(200, config.intensity),
            hold: 2.0 / config.speed,
        }
    }
}

impl Generator for Rainbow {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let color = Hsb::new(wrap_hue(self.hue), 254, self.bri);
        self.hue += 2000;
        Ok(whole(
            cx,
            LightState::color(color).with_transition(deciseconds(self.hold * 1.5)),
            secs(self.hold),
        ))
    }
}

/// Alternates between full and low brightness.
pub(super) struct Pulse {
    high: u8,
    low: u8,
    hold: f32,
    bright: bool,
}

impl Pulse {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            high: scale_bri(BRI_MAX, config.intensity),
            low: scale_bri(50, config.intensity),
            hold: 1.0 / config.speed,
            bright: false,
        }
    }
}

impl Generator for Pulse {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        self.bright = !self.bright;
        let bri = if self.bright { self.high } else { self.low };
        Ok(whole(
            cx,
            LightState::brightness(bri).with_transition(deciseconds(self.hold)),
            secs(self.hold),
        ))
    }
}

/// Sinusoidal brightness swell in the palette's lead colour.
pub(super) struct Breathe {
    color: Hsb,
    speed: f32,
}

const BREATHE_FLOOR: f32 = 30.0;

impl Breathe {
    pub fn new(config: &GeneratorConfig) -> Self {
        let lead = config
            .palette
            .colors(DEFAULT_PALETTE_BRI)
            .first()
            .copied()
            .unwrap_or(Hsb::new(0, 254, DEFAULT_PALETTE_BRI));
        Self {
            color: lead.with_bri(scale_bri(lead.bri, config.intensity)),
            speed: config.speed,
        }
    }

    fn brightness_at(&self, secs: f32) -> u8 {
        let level = ((secs * self.speed).sin() + 1.0) / 2.0;
        let peak = f32::from(self.color.bri).max(BREATHE_FLOOR);
        (BREATHE_FLOOR + (peak - BREATHE_FLOOR) * level).round() as u8
    }
}

impl Generator for Breathe {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let color = self.color.with_bri(self.brightness_at(cx.secs()));
        Ok(whole(
            cx,
            LightState::color(color).with_transition(deciseconds(1.5 / self.speed)),
            Duration::from_millis(100),
        ))
    }
}

/// Five-phase fade from daylight to deep red, then done.
pub(super) struct Sunset {
    phase: usize,
    phase_len: Duration,
}

impl Sunset {
    pub fn new(config: &GeneratorConfig) -> Self {
        let phase_len = config
            .duration()
            .map(|total| total / SUNSET.len() as u32)
            .unwrap_or(SUNSET_PHASE_DEFAULT);
        Self {
            phase: 0,
            phase_len,
        }
    }
}

impl Generator for Sunset {
    fn next_frame(&mut self, cx: &FrameContext<'_>, _rng: &mut dyn RngCore) -> Result<Step> {
        let Some(color) = SUNSET.get(self.phase).copied() else {
            return Ok(Step::Finished);
        };
        self.phase += 1;
        let fade = deciseconds(self.phase_len.as_secs_f32());
        Ok(whole(
            cx,
            LightState::color(color).with_transition(fade),
            self.phase_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::TAU;

    use super::*;
    use crate::effects::{testing, PaletteName};

    #[test]
    fn colorloop_advances_and_wraps_hue() {
        let mut generator = Colorloop::new(&GeneratorConfig {
            color: crate::effects::ColorSpec::fixed(Hsb::new(65_000, 254, 254)),
            ..GeneratorConfig::default()
        });
        let mut rng = testing::rng(1);
        let targets = testing::lights(2);

        let first = testing::frame_at(&mut generator, 0.0, &targets, &mut rng);
        let second = testing::frame_at(&mut generator, 0.1, &targets, &mut rng);

        assert_eq!(first.commands.len(), 1);
        assert_eq!(first.commands[0].state.hue, Some(65_000));
        assert_eq!(second.commands[0].state.hue, Some(464));
        assert!((first.hold.as_secs_f64() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn breathe_stays_between_floor_and_palette_brightness() {
        let generator = Breathe::new(&GeneratorConfig {
            palette: PaletteName::Warm,
            ..GeneratorConfig::default()
        });
        let period = TAU;
        for step in 0..64 {
            let bri = generator.brightness_at(period * step as f32 / 64.0);
            assert!((30..=DEFAULT_PALETTE_BRI).contains(&bri), "{bri}");
        }
    }

    #[test]
    fn sunset_runs_five_phases_then_finishes() {
        let mut generator = Sunset::new(&GeneratorConfig {
            duration_secs: 10.0,
            ..GeneratorConfig::default()
        });
        let mut rng = testing::rng(2);
        let targets = testing::lights(1);
        let cx = FrameContext {
            elapsed: Duration::ZERO,
            selector: &crate::light::TargetSelector::All,
            targets: &targets,
        };

        for phase in SUNSET {
            let Step::Emit(frame) = generator.next_frame(&cx, &mut rng).unwrap() else {
                panic!("sunset ended early");
            };
            assert_eq!(frame.hold, Duration::from_secs(2));
            assert_eq!(frame.commands[0].state.bri, Some(phase.bri));
            assert_eq!(frame.commands[0].state.transition, Some(20));
        }
        assert_eq!(generator.next_frame(&cx, &mut rng).unwrap(), Step::Finished);
    }

    #[test]
    fn pulse_alternates_high_and_low() {
        let mut generator = Pulse::new(&GeneratorConfig::default());
        let mut rng = testing::rng(3);
        let targets = testing::lights(1);

        let high = testing::frame_at(&mut generator, 0.0, &targets, &mut rng);
        let low = testing::frame_at(&mut generator, 1.0, &targets, &mut rng);

        assert_eq!(high.commands[0].state.bri, Some(254));
        assert_eq!(low.commands[0].state.bri, Some(50));
    }
}
