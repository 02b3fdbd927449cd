//! Effect control surface: start, stop, list and emergency stop.

use std::{collections::BTreeSet, sync::Arc};

use tracing::{info, warn};

use crate::{
    effects::{build_generator, effect_id, runner, EffectKind, GeneratorConfig},
    light::{LightSink, LightState, TargetSelector},
    registry::{Admission, CancelOutcome, EffectId, EffectInfo, EffectRegistry, EffectTask},
    Result, SafetyLimits,
};

/// Result of [`EffectEngine::start`].
#[derive(Debug)]
pub enum StartOutcome {
    /// The effect was admitted. Dropping the task detaches it.
    Started(EffectTask),
    AlreadyRunning(EffectId),
}

impl StartOutcome {
    pub fn id(&self) -> &EffectId {
        match self {
            Self::Started(task) => task.id(),
            Self::AlreadyRunning(id) => id,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Runs lighting effects against one light sink.
///
/// Cloning shares the registry and sink.
#[derive(Clone)]
pub struct EffectEngine {
    registry: EffectRegistry,
    sink: Arc<dyn LightSink>,
    limits: SafetyLimits,
}

impl EffectEngine {
    pub fn new(sink: Arc<dyn LightSink>, limits: SafetyLimits) -> Self {
        Self::with_registry(EffectRegistry::new(), sink, limits)
    }

    pub fn with_registry(
        registry: EffectRegistry,
        sink: Arc<dyn LightSink>,
        limits: SafetyLimits,
    ) -> Self {
        Self {
            registry,
            sink,
            limits,
        }
    }

    pub fn registry(&self) -> &EffectRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn LightSink> {
        &self.sink
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Clamps `config`, derives the effect identity and starts the effect
    /// unless that identity is already running. A stopped instance that has
    /// not finished its teardown still counts as running.
    pub fn start(&self, kind: EffectKind, config: GeneratorConfig) -> Result<StartOutcome> {
        let config = config.sanitized(kind, &self.limits);
        let id = effect_id(kind, &config);
        let generator = build_generator(kind, &config)?;

        let info = EffectInfo::new(id.clone(), kind, config.clone());
        let run = runner::EffectRun {
            kind,
            config,
            generator,
            sink: self.sink.clone(),
        };
        match self
            .registry
            .try_start(info, move |lease| runner::run(lease, run))?
        {
            Admission::Started(task) => Ok(StartOutcome::Started(task)),
            Admission::AlreadyRunning => Ok(StartOutcome::AlreadyRunning(id)),
        }
    }

    pub fn stop(&self, id: &str) -> Result<CancelOutcome> {
        self.registry.cancel(id)
    }

    pub fn list(&self) -> Result<BTreeSet<EffectId>> {
        self.registry.list_active()
    }

    pub fn running(&self) -> Result<Vec<EffectInfo>> {
        self.registry.active_info()
    }

    /// Cancels every effect matching `predicate` and returns how many were
    /// stopped.
    pub fn emergency_stop<P>(&self, predicate: P) -> Result<usize>
    where
        P: Fn(&EffectInfo) -> bool,
    {
        let stopped = self.registry.cancel_all_matching(predicate)?;
        if !stopped.is_empty() {
            warn!(count = stopped.len(), effects = ?stopped, "emergency stop");
        }
        Ok(stopped.len())
    }

    /// Stops every strobe-class effect and fades all lights off.
    pub fn stop_all_strobes(&self) -> Result<usize> {
        let stopped = self.emergency_stop(|info| info.kind.is_strobe_class())?;
        if let Err(err) = self
            .sink
            .set_state(&TargetSelector::All, &LightState::safe_off())
        {
            warn!(error = %err, "all-off after strobe stop failed");
        }
        info!(stopped, "strobes stopped");
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::light::MemorySink;

    fn engine(lights: usize) -> (EffectEngine, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::with_lights(lights));
        (EffectEngine::new(sink.clone(), SafetyLimits::default()), sink)
    }

    fn unbounded() -> GeneratorConfig {
        GeneratorConfig {
            duration_secs: 0.0,
            seed: Some(3),
            ..GeneratorConfig::default()
        }
    }

    #[test]
    fn start_stop_round_trip() {
        let (engine, _sink) = engine(3);
        let outcome = engine.start(EffectKind::Wave, unbounded()).unwrap();
        assert!(outcome.is_started());
        assert_eq!(outcome.id().as_str(), "wave_all");
        assert!(engine.list().unwrap().contains("wave_all"));

        assert_eq!(engine.stop("wave_all").unwrap(), CancelOutcome::Cancelled);
        if let StartOutcome::Started(task) = outcome {
            task.join().unwrap();
        }
        assert!(engine.list().unwrap().is_empty());
        assert_eq!(engine.stop("wave_all").unwrap(), CancelOutcome::NotFound);
    }

    #[test]
    fn invalid_custom_program_is_rejected_before_admission() {
        let (engine, _sink) = engine(1);
        assert!(engine.start(EffectKind::Custom, unbounded()).is_err());
        assert!(engine.list().unwrap().is_empty());
    }

    #[test]
    fn cancelled_strobe_fades_its_targets_off() {
        let (engine, sink) = engine(2);
        let outcome = engine
            .start(
                EffectKind::Strobe,
                GeneratorConfig {
                    frequency_hz: 5.0,
                    ..unbounded()
                },
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(150));
        engine.stop(outcome.id().as_str()).unwrap();
        if let StartOutcome::Started(task) = outcome {
            task.join().unwrap();
        }

        let commands = sink.commands().unwrap();
        let last = commands.last().unwrap();
        assert_eq!(last.state, LightState::safe_off());
        assert!(sink.snapshot().unwrap().values().all(|light| !light.on));
    }

    #[test]
    fn stop_all_strobes_leaves_patterns_running() {
        let (engine, sink) = engine(2);
        let mut tasks = Vec::new();
        for (kind, config) in [
            (EffectKind::Strobe, unbounded()),
            (EffectKind::UltraStrobe, unbounded()),
            (EffectKind::Aurora, unbounded()),
        ] {
            if let StartOutcome::Started(task) = engine.start(kind, config).unwrap() {
                tasks.push(task);
            }
        }

        assert_eq!(engine.stop_all_strobes().unwrap(), 2);
        assert_eq!(
            engine.list().unwrap().into_iter().collect::<Vec<_>>(),
            vec![EffectId::new("aurora_all")]
        );
        assert!(sink
            .commands()
            .unwrap()
            .iter()
            .any(|c| c.target == TargetSelector::All && c.state == LightState::safe_off()));

        engine.stop("aurora_all").unwrap();
        for task in tasks {
            task.join().unwrap();
        }
    }

    #[test]
    fn running_reports_clamped_config() {
        let (engine, _sink) = engine(2);
        let outcome = engine
            .start(
                EffectKind::Wave,
                GeneratorConfig {
                    speed: 40.0,
                    ..unbounded()
                },
            )
            .unwrap();

        let running = engine.running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].kind, EffectKind::Wave);
        assert_eq!(running[0].config.speed, 5.0);

        engine.stop(outcome.id().as_str()).unwrap();
        if let StartOutcome::Started(task) = outcome {
            task.join().unwrap();
        }
        assert!(engine.running().unwrap().is_empty());
    }

    #[test]
    fn restart_waits_for_the_stopped_strobe_to_finish() {
        let sink = Arc::new(MemorySink::with_lights(3).with_latency(Duration::from_millis(40)));
        let engine = EffectEngine::new(sink.clone(), SafetyLimits::default());
        let config = GeneratorConfig {
            frequency_hz: 5.0,
            ..unbounded()
        };

        let StartOutcome::Started(first) = engine.start(EffectKind::Strobe, config.clone()).unwrap()
        else {
            panic!("strobe was not admitted");
        };
        // the first flash is still being sent when the stop lands
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(engine.stop(first.id().as_str()).unwrap(), CancelOutcome::Cancelled);

        let early = engine.start(EffectKind::Strobe, config.clone()).unwrap();
        assert!(!early.is_started());
        assert!(engine.list().unwrap().is_empty());

        first.join().unwrap();
        sink.clear_commands().unwrap();
        let second = engine.start(EffectKind::Strobe, config).unwrap();
        assert!(second.is_started());
        std::thread::sleep(Duration::from_millis(150));

        // nothing from the old instance lands while the new one is live
        let commands = sink.commands().unwrap();
        assert!(!commands.is_empty());
        assert!(commands.iter().all(|c| c.state != LightState::safe_off()));

        engine.stop(second.id().as_str()).unwrap();
        if let StartOutcome::Started(task) = second {
            task.join().unwrap();
        }
    }

    #[test]
    fn missing_light_aborts_the_effect() {
        let (engine, sink) = engine(2);
        sink.remove_light("2").unwrap();
        let outcome = engine
            .start(
                EffectKind::Pulse,
                GeneratorConfig {
                    target: TargetSelector::Light("2".into()),
                    ..unbounded()
                },
            )
            .unwrap();
        if let StartOutcome::Started(task) = outcome {
            task.join().unwrap();
        }
        assert!(engine.list().unwrap().is_empty());
    }
}
