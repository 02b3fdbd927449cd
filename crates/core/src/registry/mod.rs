//! Single-instance bookkeeping for running effects.
//!
//! The registry is the only state shared between effect threads. Every
//! admit/cancel/list goes through one mutex, so admission is an atomic
//! check-and-insert: the identity is present before the effect thread exists.
//! A running effect holds an [`EffectLease`]; dropping the lease (normal end,
//! error or panic) removes the entry again. A cancelled effect keeps its entry
//! until its thread has exited, so a restart under the same identity is only
//! admitted once the old instance is gone.

use std::{
    borrow::Borrow,
    collections::{BTreeSet, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{effects::EffectKind, GeneratorConfig, LightSyncError, Result};

/// Key that distinguishes one logical effect instance from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EffectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Metadata snapshot of a running effect.
#[derive(Debug, Clone)]
pub struct EffectInfo {
    pub id: EffectId,
    pub kind: EffectKind,
    pub started_at: Instant,
    pub config: GeneratorConfig,
}

impl EffectInfo {
    pub fn new(id: EffectId, kind: EffectKind, config: GeneratorConfig) -> Self {
        Self {
            id,
            kind,
            started_at: Instant::now(),
            config,
        }
    }
}

/// Result of [`EffectRegistry::try_start`].
#[derive(Debug)]
pub enum Admission {
    Started(EffectTask),
    AlreadyRunning,
}

impl Admission {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Result of cancelling an effect by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

/// Join handle for an admitted effect thread. Dropping it detaches the thread;
/// the registry keeps tracking the effect either way.
#[derive(Debug)]
pub struct EffectTask {
    id: EffectId,
    join: JoinHandle<()>,
}

impl EffectTask {
    pub fn id(&self) -> &EffectId {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Blocks until the effect thread has exited.
    pub fn join(self) -> Result<()> {
        self.join
            .join()
            .map_err(|_| LightSyncError::msg(format!("effect `{}` panicked", self.id)))
    }
}

/// Receiving side of a cancellation signal, owned by the effect thread.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    wake: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` or until cancelled. Returns `false` when the
    /// effect was cancelled and should stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        match self.wake.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Channel that disconnects on cancellation, for use in `select!`.
    pub fn wake_channel(&self) -> &Receiver<()> {
        &self.wake
    }
}

/// Sending side kept inside the registry entry. Dropping the sender wakes
/// the token.
#[derive(Debug)]
struct CancelSignal {
    flag: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
}

impl CancelSignal {
    fn pair() -> (Self, CancelToken) {
        let flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(0);
        (
            Self {
                flag: flag.clone(),
                wake: Some(tx),
            },
            CancelToken { flag, wake: rx },
        )
    }

    fn fire(&mut self) {
        self.flag.store(true, Ordering::Release);
        self.wake = None;
    }
}

#[derive(Debug)]
struct EffectHandle {
    info: EffectInfo,
    generation: u64,
    cancel: CancelSignal,
    /// Cancelled, but the effect thread has not exited yet.
    draining: bool,
}

impl EffectHandle {
    fn is_live(&self) -> bool {
        !self.draining
    }

    fn drain(&mut self) {
        self.cancel.fire();
        self.draining = true;
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    effects: Mutex<HashMap<EffectId, EffectHandle>>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<EffectId, EffectHandle>>> {
        self.effects
            .lock()
            .map_err(|_| LightSyncError::Poisoned("effect registry"))
    }

    fn release(&self, id: &EffectId, generation: u64) {
        // Cleanup must happen even while unwinding from a panicked effect.
        let mut effects = self.effects.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = effects
            .get(id)
            .map(|handle| handle.generation == generation)
            .unwrap_or(false);
        if owned {
            effects.remove(id);
            debug!(effect = %id, "effect released");
        }
    }
}

/// Proof of admission held by a running effect thread.
#[derive(Debug)]
pub struct EffectLease {
    id: EffectId,
    generation: u64,
    token: CancelToken,
    registry: Arc<RegistryInner>,
}

impl EffectLease {
    pub fn id(&self) -> &EffectId {
        &self.id
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn sleep(&self, duration: Duration) -> bool {
        self.token.sleep(duration)
    }
}

impl Drop for EffectLease {
    fn drop(&mut self) {
        self.registry.release(&self.id, self.generation);
    }
}

/// Concurrency-safe map of running effects.
///
/// Cloning yields another handle to the same registry. Tests construct a
/// fresh one per case.
#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    inner: Arc<RegistryInner>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits `info.id` and runs `task` on a dedicated thread, unless an
    /// effect with the same identity is already live.
    pub fn try_start<F>(&self, info: EffectInfo, task: F) -> Result<Admission>
    where
        F: FnOnce(EffectLease) + Send + 'static,
    {
        let id = info.id.clone();
        let lease = {
            let mut effects = self.inner.lock()?;
            if let Some(handle) = effects.get(&id) {
                if handle.draining {
                    info!(effect = %id, "previous instance still stopping");
                } else {
                    info!(effect = %id, "effect already running");
                }
                return Ok(Admission::AlreadyRunning);
            }

            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let (cancel, token) = CancelSignal::pair();
            effects.insert(
                id.clone(),
                EffectHandle {
                    info,
                    generation,
                    cancel,
                    draining: false,
                },
            );
            EffectLease {
                id: id.clone(),
                generation,
                token,
                registry: self.inner.clone(),
            }
        };

        // A failed spawn drops the closure and with it the lease, which
        // removes the entry again.
        let join = thread::Builder::new()
            .name(format!("effect-{id}"))
            .spawn(move || task(lease))?;

        info!(effect = %id, "effect started");
        Ok(Admission::Started(EffectTask { id, join }))
    }

    /// Signals the effect to stop. The effect thread observes the signal at
    /// its next frame boundary; until it exits the identity is hidden from
    /// listings but still blocks a new start.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let mut effects = self.inner.lock()?;
        Ok(match effects.get_mut(id).filter(|handle| handle.is_live()) {
            Some(handle) => {
                handle.drain();
                info!(effect = %id, "effect cancelled");
                CancelOutcome::Cancelled
            }
            None => CancelOutcome::NotFound,
        })
    }

    /// Cancels every live effect matching `predicate`. Returns the identities
    /// that were stopped.
    pub fn cancel_all_matching<P>(&self, predicate: P) -> Result<Vec<EffectId>>
    where
        P: Fn(&EffectInfo) -> bool,
    {
        let mut effects = self.inner.lock()?;
        let mut stopped: Vec<EffectId> = effects
            .values_mut()
            .filter(|handle| handle.is_live() && predicate(&handle.info))
            .map(|handle| {
                handle.drain();
                handle.info.id.clone()
            })
            .collect();
        stopped.sort();
        Ok(stopped)
    }

    pub fn list_active(&self) -> Result<BTreeSet<EffectId>> {
        Ok(self
            .inner
            .lock()?
            .values()
            .filter(|handle| handle.is_live())
            .map(|handle| handle.info.id.clone())
            .collect())
    }

    pub fn active_info(&self) -> Result<Vec<EffectInfo>> {
        let mut infos: Vec<EffectInfo> = self
            .inner
            .lock()?
            .values()
            .filter(|handle| handle.is_live())
            .map(|handle| handle.info.clone())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos)
    }

    pub fn is_active(&self, id: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()?
            .get(id)
            .is_some_and(EffectHandle::is_live))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;

    fn info(id: &str, kind: EffectKind) -> EffectInfo {
        EffectInfo::new(EffectId::new(id), kind, GeneratorConfig::default())
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn park_until_cancelled(lease: EffectLease) {
        while lease.sleep(Duration::from_millis(50)) {}
    }

    #[test]
    fn second_start_with_same_identity_is_rejected() {
        let registry = EffectRegistry::new();

        let first = registry
            .try_start(info("strobe_all", EffectKind::Strobe), park_until_cancelled)
            .unwrap();
        let second = registry
            .try_start(info("strobe_all", EffectKind::Strobe), park_until_cancelled)
            .unwrap();

        assert!(first.is_started());
        assert!(matches!(second, Admission::AlreadyRunning));
        assert_eq!(registry.list_active().unwrap().len(), 1);

        registry.cancel("strobe_all").unwrap();
        if let Admission::Started(task) = first {
            task.join().unwrap();
        }
    }

    #[test]
    fn racing_admissions_admit_exactly_one() {
        let registry = EffectRegistry::new();
        let barrier = Arc::new(Barrier::new(8));

        let racers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry
                        .try_start(info("wave_all", EffectKind::Wave), park_until_cancelled)
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<Admission> = racers.into_iter().map(|r| r.join().unwrap()).collect();
        let started = outcomes.iter().filter(|outcome| outcome.is_started()).count();
        assert_eq!(started, 1);

        registry.cancel("wave_all").unwrap();
        for outcome in outcomes {
            if let Admission::Started(task) = outcome {
                task.join().unwrap();
            }
        }
    }

    #[test]
    fn cancel_unknown_identity_reports_not_found() {
        let registry = EffectRegistry::new();
        assert_eq!(registry.cancel("nope").unwrap(), CancelOutcome::NotFound);
    }

    #[test]
    fn cancelled_task_wakes_within_one_interval() {
        let registry = EffectRegistry::new();
        let interval = Duration::from_millis(500);
        let admission = registry
            .try_start(info("breathe_all", EffectKind::Breathe), move |lease| {
                while lease.sleep(interval) {}
            })
            .unwrap();
        let Admission::Started(task) = admission else {
            panic!("effect should start");
        };

        let cancelled_at = Instant::now();
        assert_eq!(
            registry.cancel("breathe_all").unwrap(),
            CancelOutcome::Cancelled
        );
        task.join().unwrap();

        assert!(cancelled_at.elapsed() < interval);
        assert!(!registry.is_active("breathe_all").unwrap());
    }

    #[test]
    fn finished_task_removes_itself() {
        let registry = EffectRegistry::new();
        let admission = registry
            .try_start(info("pulse_all", EffectKind::Pulse), |_lease| {})
            .unwrap();
        if let Admission::Started(task) = admission {
            task.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(1), || registry
            .list_active()
            .unwrap()
            .is_empty()));
    }

    #[test]
    fn panicking_task_still_releases_its_entry() {
        let registry = EffectRegistry::new();
        let admission = registry
            .try_start(info("fire_all", EffectKind::Fire), |_lease| {
                panic!("generator blew up");
            })
            .unwrap();
        if let Admission::Started(task) = admission {
            assert!(task.join().is_err());
        }

        assert!(!registry.is_active("fire_all").unwrap());
    }

    #[test]
    fn cancelled_instance_blocks_restart_until_it_exits() {
        let registry = EffectRegistry::new();
        let (release_tx, release_rx) = bounded::<()>(0);

        // The first instance ignores cancellation until told to exit.
        let first = registry
            .try_start(info("comet_all", EffectKind::Comet), move |_lease| {
                let _ = release_rx.recv();
            })
            .unwrap();
        assert_eq!(registry.cancel("comet_all").unwrap(), CancelOutcome::Cancelled);

        assert!(registry.list_active().unwrap().is_empty());
        assert!(!registry.is_active("comet_all").unwrap());
        assert_eq!(registry.cancel("comet_all").unwrap(), CancelOutcome::NotFound);
        let early = registry
            .try_start(info("comet_all", EffectKind::Comet), park_until_cancelled)
            .unwrap();
        assert!(matches!(early, Admission::AlreadyRunning));

        drop(release_tx);
        if let Admission::Started(task) = first {
            task.join().unwrap();
        }
        let second = registry
            .try_start(info("comet_all", EffectKind::Comet), park_until_cancelled)
            .unwrap();
        assert!(second.is_started());
        assert!(registry.is_active("comet_all").unwrap());

        registry.cancel("comet_all").unwrap();
        if let Admission::Started(task) = second {
            task.join().unwrap();
        }
        assert!(!registry.is_active("comet_all").unwrap());
    }

    #[test]
    fn emergency_sweep_skips_instances_already_stopping() {
        let registry = EffectRegistry::new();
        let first = registry
            .try_start(info("strobe_single_all_20", EffectKind::Strobe), park_until_cancelled)
            .unwrap();
        registry.cancel("strobe_single_all_20").unwrap();

        let stopped = registry
            .cancel_all_matching(|info| info.kind.is_strobe_class())
            .unwrap();
        assert!(stopped.is_empty());

        if let Admission::Started(task) = first {
            task.join().unwrap();
        }
        assert!(registry.active_info().unwrap().is_empty());
    }

    #[test]
    fn cancel_all_matching_only_hits_the_predicate() {
        let registry = EffectRegistry::new();
        let mut tasks = Vec::new();
        for (id, kind) in [
            ("strobe_single_all_100", EffectKind::Strobe),
            ("ultra_strobe_police_all_120", EffectKind::UltraStrobe),
            ("aurora_all", EffectKind::Aurora),
        ] {
            if let Admission::Started(task) =
                registry.try_start(info(id, kind), park_until_cancelled).unwrap()
            {
                tasks.push(task);
            }
        }

        let stopped = registry
            .cancel_all_matching(|info| info.kind.is_strobe_class())
            .unwrap();

        assert_eq!(stopped.len(), 2);
        let active = registry.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.contains("aurora_all"));

        registry.cancel("aurora_all").unwrap();
        for task in tasks {
            task.join().unwrap();
        }
    }
}
