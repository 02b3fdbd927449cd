//! Drives one generator on its own effect thread.

use std::{sync::Arc, time::Instant};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::{EffectKind, FrameContext, Generator, GeneratorConfig, Step};
use crate::{
    light::{sorted_light_ids, LightCommand, LightSink, LightState, TargetSelector},
    registry::EffectLease,
    LightSyncError, Result,
};

/// Why an effect loop stopped.
#[derive(Debug)]
enum Ended {
    Cancelled,
    Expired,
    Finished,
    Fault(LightSyncError),
}

pub(crate) struct EffectRun {
    pub kind: EffectKind,
    pub config: GeneratorConfig,
    pub generator: Box<dyn Generator>,
    pub sink: Arc<dyn LightSink>,
}

/// Expands a selector into individually addressable targets. "all" becomes
/// every known light in numeric order; lights and groups stay as they are.
///
/// The sink does not expose group membership, so a group is one target.
/// Generators that spread a phase across targets therefore drive every
/// member of a group in lock-step, and a comet on a group has nowhere to
/// travel and finishes without emitting a frame.
pub(crate) fn resolve_targets(
    sink: &dyn LightSink,
    selector: &TargetSelector,
) -> Result<Vec<TargetSelector>> {
    match selector {
        TargetSelector::All => {
            let ids = sorted_light_ids(&sink.snapshot()?);
            if ids.is_empty() {
                return Err(LightSyncError::MissingTarget("all".to_string()));
            }
            Ok(ids.into_iter().map(TargetSelector::Light).collect())
        }
        other => Ok(vec![other.clone()]),
    }
}

/// Sends every command of a frame. Rejected commands are logged and skipped;
/// a target that no longer exists aborts the frame.
pub(crate) fn dispatch(sink: &dyn LightSink, commands: &[LightCommand]) -> Result<()> {
    for command in commands {
        let state = command.state.clone().sanitized();
        match sink.set_state(&command.target, &state) {
            Ok(()) => {}
            Err(err @ LightSyncError::MissingTarget(_)) => return Err(err),
            Err(err) => {
                warn!(light = %command.target, error = %err, "light command failed, skipping");
            }
        }
    }
    Ok(())
}

pub(crate) fn run(lease: EffectLease, mut run: EffectRun) {
    let mut rng = match run.config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::seed_from_u64(rand::random()),
    };

    let started = Instant::now();
    let ended = match resolve_targets(run.sink.as_ref(), &run.config.target) {
        Ok(targets) => {
            debug!(effect = %lease.id(), targets = targets.len(), "targets resolved");
            run.drive(&lease, &targets, &mut rng, started)
        }
        Err(err) => Ended::Fault(err),
    };

    if run.kind.is_strobe_class() {
        if let Err(err) = run.sink.set_state(&run.config.target, &LightState::safe_off()) {
            warn!(effect = %lease.id(), error = %err, "strobe teardown failed");
        }
    }

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match ended {
        Ended::Cancelled => info!(effect = %lease.id(), elapsed_ms, "effect cancelled"),
        Ended::Expired => info!(effect = %lease.id(), elapsed_ms, "effect expired"),
        Ended::Finished => info!(effect = %lease.id(), elapsed_ms, "effect finished"),
        Ended::Fault(err) => {
            error!(effect = %lease.id(), elapsed_ms, error = %err, "effect aborted")
        }
    }
}

impl EffectRun {
    fn drive(
        &mut self,
        lease: &EffectLease,
        targets: &[TargetSelector],
        rng: &mut StdRng,
        started: Instant,
    ) -> Ended {
        let limit = self.config.duration();
        loop {
            if lease.is_cancelled() {
                return Ended::Cancelled;
            }
            let elapsed = started.elapsed();
            if limit.is_some_and(|limit| elapsed >= limit) {
                return Ended::Expired;
            }

            let cx = FrameContext {
                elapsed,
                selector: &self.config.target,
                targets,
            };
            let frame = match self.generator.next_frame(&cx, rng) {
                Ok(Step::Emit(frame)) => frame,
                Ok(Step::Finished) => return Ended::Finished,
                Err(err) => return Ended::Fault(err),
            };
            // A cancel that lands while the frame was computed wins.
            if lease.is_cancelled() {
                return Ended::Cancelled;
            }
            if let Err(err) = dispatch(self.sink.as_ref(), &frame.commands) {
                return Ended::Fault(err);
            }

            let hold = match limit {
                Some(limit) => frame.hold.min(limit.saturating_sub(started.elapsed())),
                None => frame.hold,
            };
            if !lease.sleep(hold) {
                return Ended::Cancelled;
            }
        }
    }
}
