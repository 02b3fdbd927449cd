use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use super::{LightSink, LightSnapshot, LightState, TargetSelector};
use crate::{LightSyncError, Result};

/// A command as observed by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub at: Instant,
    pub target: TargetSelector,
    pub state: LightState,
}

#[derive(Debug, Default)]
struct Lights {
    lights: BTreeMap<String, LightSnapshot>,
    groups: BTreeMap<String, Vec<String>>,
    unreachable: BTreeSet<String>,
}

/// In-process stand-in for the light gateway.
///
/// Applies commands to an in-memory light table and records them, optionally
/// with an artificial per-command latency. The command line app drives it as
/// its simulated bridge and the tests use it to observe effect output.
#[derive(Debug)]
pub struct MemorySink {
    state: Mutex<Lights>,
    log: Mutex<Vec<RecordedCommand>>,
    latency: Duration,
}

impl MemorySink {
    /// Creates a sink with lights `"1"` to `"count"`, all off and reachable.
    pub fn with_lights(count: usize) -> Self {
        let lights = (1..=count)
            .map(|index| {
                (
                    index.to_string(),
                    LightSnapshot {
                        on: false,
                        brightness: 1,
                        reachable: true,
                    },
                )
            })
            .collect();

        Self {
            state: Mutex::new(Lights {
                lights,
                ..Lights::default()
            }),
            log: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delays every `set_state` call, simulating a slow network bridge.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_group(self, id: &str, members: &[&str]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.groups.insert(
                id.to_string(),
                members.iter().map(|member| member.to_string()).collect(),
            );
        }
        self
    }

    pub fn set_reachable(&self, id: &str, reachable: bool) -> Result<()> {
        let mut state = self.lock_state()?;
        if let Some(light) = state.lights.get_mut(id) {
            light.reachable = reachable;
        }
        if reachable {
            state.unreachable.remove(id);
        } else {
            state.unreachable.insert(id.to_string());
        }
        Ok(())
    }

    /// Deletes a light, as if it had been removed from the bridge.
    pub fn remove_light(&self, id: &str) -> Result<()> {
        let mut state = self.lock_state()?;
        state.lights.remove(id);
        state.unreachable.remove(id);
        Ok(())
    }

    pub fn commands(&self) -> Result<Vec<RecordedCommand>> {
        Ok(self.lock_log()?.clone())
    }

    pub fn clear_commands(&self) -> Result<()> {
        self.lock_log()?.clear();
        Ok(())
    }

    pub fn light(&self, id: &str) -> Result<Option<LightSnapshot>> {
        Ok(self.lock_state()?.lights.get(id).copied())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Lights>> {
        self.state
            .lock()
            .map_err(|_| LightSyncError::Poisoned("memory sink light table"))
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, Vec<RecordedCommand>>> {
        self.log
            .lock()
            .map_err(|_| LightSyncError::Poisoned("memory sink command log"))
    }
}

impl LightSink for MemorySink {
    fn set_state(&self, target: &TargetSelector, state: &LightState) -> Result<()> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        {
            let mut lights = self.lock_state()?;
            let ids: Vec<String> = match target {
                TargetSelector::All => lights.lights.keys().cloned().collect(),
                TargetSelector::Light(id) => {
                    if !lights.lights.contains_key(id) {
                        return Err(LightSyncError::MissingTarget(target.to_string()));
                    }
                    if lights.unreachable.contains(id) {
                        return Err(LightSyncError::Sink(format!("light {id} is unreachable")));
                    }
                    vec![id.clone()]
                }
                TargetSelector::Group(id) => lights
                    .groups
                    .get(id)
                    .cloned()
                    .ok_or_else(|| LightSyncError::MissingTarget(target.to_string()))?,
            };

            for id in ids {
                if lights.unreachable.contains(&id) {
                    continue;
                }
                if let Some(light) = lights.lights.get_mut(&id) {
                    if let Some(on) = state.on {
                        light.on = on;
                    }
                    if let Some(bri) = state.bri {
                        light.brightness = bri;
                    }
                }
            }
        }

        debug!(selector = %target, ?state, "light command");
        self.lock_log()?.push(RecordedCommand {
            at: Instant::now(),
            target: target.clone(),
            state: state.clone(),
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<BTreeMap<String, LightSnapshot>> {
        Ok(self.lock_state()?.lights.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::Hsb;

    #[test]
    fn applies_commands_to_every_light() {
        let sink = MemorySink::with_lights(3);
        sink.set_state(&TargetSelector::All, &LightState::color(Hsb::new(0, 254, 200)))
            .unwrap();

        let snapshot = sink.snapshot().unwrap();
        assert!(snapshot.values().all(|light| light.on && light.brightness == 200));
        assert_eq!(sink.commands().unwrap().len(), 1);
    }

    #[test]
    fn distinguishes_unreachable_from_missing_lights() {
        let sink = MemorySink::with_lights(2);
        sink.set_reachable("1", false).unwrap();
        sink.remove_light("2").unwrap();

        let unreachable = sink
            .set_state(&TargetSelector::Light("1".into()), &LightState::off())
            .unwrap_err();
        assert!(unreachable.is_transient());

        let missing = sink
            .set_state(&TargetSelector::Light("2".into()), &LightState::off())
            .unwrap_err();
        assert!(matches!(missing, LightSyncError::MissingTarget(_)));
    }

    #[test]
    fn groups_address_their_members() {
        let sink = MemorySink::with_lights(3).with_group("kitchen", &["2", "3"]);
        sink.set_state(
            &TargetSelector::Group("kitchen".into()),
            &LightState::brightness(90),
        )
        .unwrap();

        assert!(!sink.light("1").unwrap().unwrap().on);
        assert_eq!(sink.light("3").unwrap().unwrap().brightness, 90);
    }
}
