use std::time::Duration;

use rand::RngCore;

use super::{
    palette::{DISCO, RAINBOW},
    ColorSpec, Frame, FrameContext, Generator, GeneratorConfig, Step, StrobeMode, UltraMode,
};
use crate::{
    light::{scale_bri, Hsb, LightCommand, LightState},
    Result,
};

const STROBE_DUTY: f64 = 0.25;
const POLICE_DUTY: f64 = 0.3;
const ULTRA_FLASH: Duration = Duration::from_millis(30);
const BURST_FLASH: Duration = Duration::from_millis(20);
const BURST_LEN: u32 = 4;
const BURST_PAUSE: Duration = Duration::from_millis(500);
const POLICE_BLUE: Hsb = Hsb::new(46920, 254, 254);
const POLICE_RED: Hsb = Hsb::new(0, 254, 254);

/// On/off split of one flash cycle. `on + off` is always exactly one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrobeTiming {
    pub on: Duration,
    pub off: Duration,
}

impl StrobeTiming {
    /// Splits the period of `frequency_hz` by a duty cycle in `0.0..=1.0`.
    pub fn with_duty(frequency_hz: f32, duty: f64) -> Self {
        let period = period_of(frequency_hz);
        let on = period.mul_f64(duty.clamp(0.0, 1.0));
        Self::split(period, on)
    }

    /// A fixed-length flash followed by the rest of the period.
    pub fn with_flash(frequency_hz: f32, flash: Duration) -> Self {
        let period = period_of(frequency_hz);
        Self::split(period, flash.min(period))
    }

    pub fn period(&self) -> Duration {
        self.on + self.off
    }

    fn split(period: Duration, on: Duration) -> Self {
        Self {
            on,
            off: period.saturating_sub(on),
        }
    }
}

fn period_of(frequency_hz: f32) -> Duration {
    let hz = if frequency_hz.is_finite() && frequency_hz > 0.0 {
        f64::from(frequency_hz)
    } else {
        1.0
    };
    Duration::from_secs_f64(1.0 / hz)
}

fn flash(cx: &FrameContext<'_>, color: Hsb, hold: Duration) -> Step {
    let command = LightCommand::new(cx.selector.clone(), LightState::color(color));
    Step::Emit(Frame::new(vec![command], hold))
}

fn dark(cx: &FrameContext<'_>, hold: Duration) -> Step {
    let command = LightCommand::new(cx.selector.clone(), LightState::off());
    Step::Emit(Frame::new(vec![command], hold))
}

/// Classic strobe: 25% on, 75% off, cycling through a colour sequence.
pub(super) struct Strobe {
    timing: StrobeTiming,
    sequence: Vec<ColorSpec>,
    intensity: f32,
    next: usize,
    lit: bool,
}

impl Strobe {
    pub fn new(config: &GeneratorConfig) -> Self {
        let sequence = match config.strobe_mode {
            StrobeMode::Multi if !config.colors.is_empty() => config.colors.clone(),
            StrobeMode::Rainbow => RAINBOW
                .iter()
                .map(|c| ColorSpec::fixed(c.with_bri(config.color.bri)))
                .collect(),
            _ => vec![config.color],
        };
        Self {
            timing: StrobeTiming::with_duty(config.frequency_hz, STROBE_DUTY),
            sequence,
            intensity: config.intensity,
            next: 0,
            lit: false,
        }
    }
}

impl Generator for Strobe {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        self.lit = !self.lit;
        if !self.lit {
            return Ok(dark(cx, self.timing.off));
        }

        let spec = self.sequence[self.next % self.sequence.len()];
        self.next = (self.next + 1) % self.sequence.len();
        let color = spec.resolve(rng);
        Ok(flash(
            cx,
            color.with_bri(scale_bri(color.bri, self.intensity)),
            self.timing.on,
        ))
    }
}

/// High-frequency strobe family.
pub(super) struct UltraStrobe {
    mode: UltraMode,
    timing: StrobeTiming,
    color: ColorSpec,
    intensity: f32,
    flashes: u32,
    lit: bool,
}

impl UltraStrobe {
    pub fn new(config: &GeneratorConfig) -> Self {
        let timing = match config.ultra_mode {
            UltraMode::Ultra => StrobeTiming::with_flash(config.frequency_hz, ULTRA_FLASH),
            UltraMode::Burst | UltraMode::DiscoFlash => {
                StrobeTiming::with_flash(config.frequency_hz, BURST_FLASH)
            }
            UltraMode::Police => StrobeTiming::with_duty(config.frequency_hz, POLICE_DUTY),
        };
        Self {
            mode: config.ultra_mode,
            timing,
            color: config.color,
            intensity: config.intensity,
            flashes: 0,
            lit: false,
        }
    }

    fn flash_color(&mut self, rng: &mut dyn RngCore) -> Hsb {
        match self.mode {
            UltraMode::Ultra | UltraMode::Burst => self.color.resolve(rng),
            UltraMode::Police => {
                if self.flashes % 2 == 0 {
                    POLICE_BLUE
                } else {
                    POLICE_RED
                }
            }
            UltraMode::DiscoFlash => {
                let index = (rng.next_u32() as usize) % DISCO.len();
                DISCO[index]
            }
        }
    }
}

impl Generator for UltraStrobe {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        self.lit = !self.lit;
        if self.lit {
            let color = self.flash_color(rng);
            self.flashes += 1;
            return Ok(flash(
                cx,
                color.with_bri(scale_bri(color.bri, self.intensity)),
                self.timing.on,
            ));
        }

        let mut hold = self.timing.off;
        if self.mode == UltraMode::Burst && self.flashes % BURST_LEN == 0 {
            hold += BURST_PAUSE;
        }
        Ok(dark(cx, hold))
    }
}
