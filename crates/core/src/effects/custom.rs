//! User-defined step programs.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{deciseconds, secs, Frame, FrameContext, Generator, ParamValue, Step};
use crate::{
    light::{Hsb, LightCommand, LightState, TargetSelector, BRI_MAX, BRI_MIN},
    Result,
};

/// Upper bound on loop passes, even for `forever` loops.
pub const MAX_LOOP_PASSES: u32 = 1000;
const LONG_PROGRAM_SECS: f32 = 3600.0;
const MANY_STEPS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopCount {
    Forever,
    Times(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Jump to a colour.
    Color {
        hue: ParamValue<u16>,
        sat: u8,
        bri: u8,
    },
    /// Change brightness only.
    Brightness { bri: u8 },
    /// Fade whatever fields are set over the step's duration.
    Transition {
        #[serde(default)]
        hue: Option<ParamValue<u16>>,
        #[serde(default)]
        sat: Option<u8>,
        #[serde(default)]
        bri: Option<u8>,
    },
    Delay,
    /// Repeat every step before this one.
    Loop { count: LoopCount },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectStep {
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default, alias = "duration")]
    pub duration_secs: f32,
    /// Overrides the effect's target for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSelector>,
}

impl EffectStep {
    pub fn new(action: StepAction, duration_secs: f32) -> Self {
        Self {
            action,
            duration_secs,
            target: None,
        }
    }

    fn brightness(&self) -> Option<u8> {
        match &self.action {
            StepAction::Color { bri, .. } | StepAction::Brightness { bri } => Some(*bri),
            StepAction::Transition { bri, .. } => *bri,
            StepAction::Delay | StepAction::Loop { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEffect {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<EffectStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub total_duration_secs: f32,
    pub has_loop: bool,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.issues.is_empty()
    }
}

impl CustomEffect {
    pub fn new(name: impl Into<String>, description: impl Into<String>, steps: Vec<EffectStep>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps,
        }
    }

    /// Checks the program before it is run. Issues block execution, warnings
    /// do not.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.name.trim().chars().count() < 3 {
            report
                .issues
                .push("name must be at least 3 characters long".to_string());
        }
        if self.steps.is_empty() {
            report.issues.push("effect needs at least one step".to_string());
        }

        for (index, step) in self.steps.iter().enumerate() {
            let n = index + 1;
            if !step.duration_secs.is_finite() || step.duration_secs < 0.0 {
                report
                    .issues
                    .push(format!("step {n}: duration must be a non-negative number"));
            }
            if let Some(bri) = step.brightness() {
                if !(BRI_MIN..=BRI_MAX).contains(&bri) {
                    report
                        .issues
                        .push(format!("step {n}: brightness {bri} outside {BRI_MIN}..={BRI_MAX}"));
                }
            }
            if let StepAction::Loop { count } = step.action {
                report.has_loop = true;
                if index + 1 != self.steps.len() {
                    report.warnings.push(format!("step {n}: loop should be the last step"));
                }
                if index == 0 {
                    report.issues.push(format!("step {n}: loop has nothing to repeat"));
                }
                if count == LoopCount::Times(0) {
                    report.issues.push(format!("step {n}: loop count must be positive"));
                }
                let body_secs: f32 = self.steps[..index]
                    .iter()
                    .map(|s| s.duration_secs.max(0.0))
                    .sum();
                if index > 0 && body_secs <= 0.0 {
                    report
                        .issues
                        .push(format!("step {n}: loop body has no duration and would spin"));
                }
            }
        }

        report.total_duration_secs = self
            .steps
            .iter()
            .filter(|step| !matches!(step.action, StepAction::Loop { .. }))
            .map(|step| step.duration_secs.max(0.0))
            .sum();
        if report.total_duration_secs > LONG_PROGRAM_SECS {
            report
                .warnings
                .push("program runs longer than an hour".to_string());
        }
        if self.steps.len() > MANY_STEPS {
            report
                .warnings
                .push(format!("program has more than {MANY_STEPS} steps"));
        }
        report
    }
}

/// Built-in programs.
pub fn templates() -> Vec<CustomEffect> {
    let all_color = |hue: u16, sat: u8, bri: u8, secs: f32| {
        EffectStep::new(
            StepAction::Color {
                hue: ParamValue::Fixed(hue),
                sat,
                bri,
            },
            secs,
        )
    };
    let fade = |hue: Option<u16>, sat: Option<u8>, bri: Option<u8>, secs: f32| {
        EffectStep::new(
            StepAction::Transition {
                hue: hue.map(ParamValue::Fixed),
                sat,
                bri,
            },
            secs,
        )
    };
    let forever = || EffectStep::new(StepAction::Loop { count: LoopCount::Forever }, 0.0);

    vec![
        CustomEffect::new(
            "color_wave",
            "Colours roll through all lights",
            vec![
                all_color(0, 254, 200, 2.0),
                fade(Some(15000), Some(254), Some(200), 1.0),
                fade(Some(30000), Some(254), Some(200), 1.0),
            ],
        ),
        CustomEffect::new(
            "breathing",
            "Gentle fade in and out",
            vec![
                EffectStep::new(StepAction::Brightness { bri: 50 }, 3.0),
                fade(None, None, Some(254), 3.0),
                forever(),
            ],
        ),
        CustomEffect::new(
            "disco",
            "Fast random colour changes",
            vec![
                EffectStep::new(
                    StepAction::Color {
                        hue: ParamValue::Random,
                        sat: 254,
                        bri: 254,
                    },
                    0.5,
                ),
                EffectStep::new(StepAction::Delay, 0.2),
                forever(),
            ],
        ),
        CustomEffect::new(
            "sunrise_custom",
            "Natural sunrise",
            vec![
                all_color(8000, 254, 1, 0.0),
                fade(Some(8000), Some(200), Some(200), 300.0),
                fade(Some(10000), Some(150), Some(254), 300.0),
            ],
        ),
    ]
}

pub fn template(name: &str) -> Option<CustomEffect> {
    templates().into_iter().find(|t| t.name == name)
}

/// Runs a validated program step by step.
pub(super) struct Sequence {
    program: CustomEffect,
    cursor: usize,
    passes: Vec<u32>,
}

impl Sequence {
    pub fn new(program: CustomEffect) -> Self {
        let passes = vec![0; program.steps.len()];
        Self {
            program,
            cursor: 0,
            passes,
        }
    }
}

impl Generator for Sequence {
    fn next_frame(&mut self, cx: &FrameContext<'_>, rng: &mut dyn RngCore) -> Result<Step> {
        // Loop steps only move the cursor; bound how many we follow per frame.
        for _ in 0..=self.program.steps.len() {
            let Some(step) = self.program.steps.get(self.cursor) else {
                return Ok(Step::Finished);
            };
            let hold = secs(step.duration_secs);
            let target = step.target.clone().unwrap_or_else(|| cx.selector.clone());

            let state = match &step.action {
                StepAction::Loop { count } => {
                    let passes = &mut self.passes[self.cursor];
                    *passes += 1;
                    let again = match count {
                        LoopCount::Forever => *passes < MAX_LOOP_PASSES,
                        LoopCount::Times(n) => *passes < (*n).min(MAX_LOOP_PASSES),
                    };
                    if again {
                        self.cursor = 0;
                    } else {
                        *passes = 0;
                        self.cursor += 1;
                    }
                    continue;
                }
                StepAction::Delay => {
                    self.cursor += 1;
                    return Ok(Step::Emit(Frame::idle(hold)));
                }
                StepAction::Color { hue, sat, bri } => {
                    LightState::color(Hsb::new(hue.resolve(rng), *sat, *bri))
                }
                StepAction::Brightness { bri } => LightState::brightness(*bri),
                StepAction::Transition { hue, sat, bri } => LightState {
                    on: Some(true),
                    hue: hue.map(|hue| hue.resolve(rng)),
                    sat: *sat,
                    bri: *bri,
                    transition: Some(deciseconds(step.duration_secs)),
                },
            };

            self.cursor += 1;
            return Ok(Step::Emit(Frame::new(
                vec![LightCommand::new(target, state)],
                hold,
            )));
        }
        Ok(Step::Finished)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::effects::testing;

    fn run(program: CustomEffect, frames: usize) -> Vec<Step> {
        let mut sequence = Sequence::new(program);
        let targets = testing::lights(2);
        let mut rng = testing::rng(7);
        let cx = FrameContext {
            elapsed: Duration::ZERO,
            selector: &TargetSelector::All,
            targets: &targets,
        };
        (0..frames)
            .map(|_| sequence.next_frame(&cx, &mut rng).unwrap())
            .collect()
    }

    #[test]
    fn templates_are_valid() {
        for template in templates() {
            let report = template.validate();
            assert!(report.valid(), "{}: {:?}", template.name, report.issues);
        }
        assert!(template("disco").is_some());
        assert!(template("nope").is_none());
    }

    #[test]
    fn rejects_short_name_and_bad_brightness() {
        let program = CustomEffect::new(
            "ab",
            "",
            vec![EffectStep::new(StepAction::Brightness { bri: 0 }, 1.0)],
        );
        let report = program.validate();
        assert!(!report.valid());
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn zero_length_forever_loop_is_rejected() {
        let program = CustomEffect::new(
            "spinner",
            "",
            vec![
                EffectStep::new(StepAction::Brightness { bri: 100 }, 0.0),
                EffectStep::new(StepAction::Loop { count: LoopCount::Forever }, 0.0),
            ],
        );
        assert!(!program.validate().valid());
    }

    #[test]
    fn loop_not_at_end_only_warns() {
        let program = CustomEffect::new(
            "warned",
            "",
            vec![
                EffectStep::new(StepAction::Delay, 1.0),
                EffectStep::new(StepAction::Loop { count: LoopCount::Times(2) }, 0.0),
                EffectStep::new(StepAction::Delay, 1.0),
            ],
        );
        let report = program.validate();
        assert!(report.valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.has_loop);
        assert_eq!(report.total_duration_secs, 2.0);
    }

    #[test]
    fn counted_loop_repeats_then_continues() {
        let program = CustomEffect::new(
            "twice",
            "",
            vec![
                EffectStep::new(StepAction::Brightness { bri: 10 }, 0.5),
                EffectStep::new(StepAction::Loop { count: LoopCount::Times(2) }, 0.0),
                EffectStep::new(StepAction::Brightness { bri: 20 }, 0.5),
            ],
        );
        let steps = run(program, 4);
        let bri: Vec<Option<u8>> = steps
            .iter()
            .map(|step| match step {
                Step::Emit(frame) => frame.commands[0].state.bri,
                Step::Finished => None,
            })
            .collect();

        assert_eq!(bri, vec![Some(10), Some(10), Some(20), None]);
    }

    #[test]
    fn transition_fades_over_the_step_duration() {
        let steps = run(template("color_wave").unwrap(), 2);
        let Step::Emit(frame) = &steps[1] else {
            panic!("expected a frame");
        };
        assert_eq!(frame.commands[0].state.transition, Some(10));
        assert_eq!(frame.commands[0].state.hue, Some(15000));
        assert_eq!(frame.commands[0].target, TargetSelector::All);
    }

    #[test]
    fn programs_parse_from_flat_json() {
        let raw = r#"{
            "name": "json program",
            "steps": [
                { "type": "color", "hue": "random", "sat": 200, "bri": 180, "duration": 1.5 },
                { "type": "delay", "duration_secs": 0.5, "target": { "light": "3" } },
                { "type": "loop", "count": { "times": 3 } }
            ]
        }"#;
        let program: CustomEffect = serde_json::from_str(raw).unwrap();

        assert_eq!(program.steps.len(), 3);
        assert_eq!(program.steps[0].duration_secs, 1.5);
        assert_eq!(
            program.steps[1].target,
            Some(TargetSelector::Light("3".into()))
        );
        assert!(program.validate().valid());
    }
}
