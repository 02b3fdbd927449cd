//! Audio sync control surface: one capture thread feeding one bridge effect.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analysis::AnalysisEngine,
    audio::{
        event_queue, AudioBackend, CaptureCounters, CaptureLoop, CaptureStats, EventPublisher,
        InputDevice,
    },
    bridge::{mapping_for, run_bridge, BridgeRun, SyncStrategy},
    effects::{effect_id, EffectKind, GeneratorConfig},
    light::TargetSelector,
    registry::{Admission, EffectId, EffectInfo, EffectRegistry, EffectTask},
    AnalysisConfig, AppConfig, AudioConfig, EffectEngine, LightSyncError, Result,
};

/// Sensitivity used when the caller passes something unusable.
const DEFAULT_SENSITIVITY: f32 = 0.5;

/// Reported by [`AudioSync::status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub active: bool,
    pub strategy: Option<SyncStrategy>,
    pub device: Option<usize>,
    pub sensitivity: Option<f32>,
    pub capture: CaptureCounters,
}

struct SyncSession {
    id: EffectId,
    strategy: SyncStrategy,
    device: Option<usize>,
    sensitivity: f32,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    capture: JoinHandle<()>,
    bridge: EffectTask,
}

impl SyncSession {
    fn shutdown(self, registry: &EffectRegistry) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        registry.cancel(self.id.as_str())?;
        self.bridge.join()?;
        self.capture
            .join()
            .map_err(|_| LightSyncError::msg("audio capture thread panicked"))
    }
}

/// Starts and stops audio-driven light output on top of an [`EffectEngine`].
pub struct AudioSync {
    engine: EffectEngine,
    backend: Arc<dyn AudioBackend>,
    audio: AudioConfig,
    analysis: AnalysisConfig,
    session: Mutex<Option<SyncSession>>,
}

impl AudioSync {
    pub fn new(engine: EffectEngine, backend: Arc<dyn AudioBackend>, config: &AppConfig) -> Self {
        Self {
            engine,
            backend,
            audio: config.audio.clone(),
            analysis: config.analysis.clone(),
            session: Mutex::new(None),
        }
    }

    pub fn list_input_devices(&self) -> Result<Vec<InputDevice>> {
        self.backend.list_input_devices()
    }

    /// Opens `device` and starts mapping its audio onto every light. A
    /// running session is stopped first.
    pub fn start_sync(
        &self,
        device: Option<usize>,
        strategy: SyncStrategy,
        sensitivity: f32,
    ) -> Result<EffectId> {
        let mut session = self.lock()?;
        if let Some(previous) = session.take() {
            info!(strategy = %previous.strategy, "replacing running audio sync");
            previous.shutdown(self.engine.registry())?;
        }

        let config = GeneratorConfig {
            target: TargetSelector::All,
            duration_secs: 0.0,
            intensity: if sensitivity.is_finite() {
                sensitivity
            } else {
                DEFAULT_SENSITIVITY
            },
            ..GeneratorConfig::default()
        }
        .sanitized(EffectKind::AudioSync, self.engine.limits());
        let sensitivity = config.intensity;
        let id = effect_id(EffectKind::AudioSync, &config);

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CaptureStats::default());
        let (publisher, events) = event_queue(self.audio.queue_capacity, strategy.subscriptions());
        let capture = self.spawn_capture(device, publisher, stop.clone(), stats.clone())?;

        let run = BridgeRun {
            mapping: mapping_for(strategy, sensitivity),
            events,
            sink: self.engine.sink().clone(),
            target: config.target.clone(),
            capture_stop: stop.clone(),
        };
        let info = EffectInfo::new(id.clone(), EffectKind::AudioSync, config);
        let admitted = self
            .engine
            .registry()
            .try_start(info, move |lease| run_bridge(lease, run));

        let bridge = match admitted {
            Ok(Admission::Started(task)) => task,
            Ok(Admission::AlreadyRunning) => {
                stop.store(true, Ordering::Release);
                let _ = capture.join();
                return Err(LightSyncError::msg(format!("`{id}` is already running")));
            }
            Err(err) => {
                stop.store(true, Ordering::Release);
                let _ = capture.join();
                return Err(err);
            }
        };

        info!(
            effect = %id,
            %strategy,
            ?device,
            sensitivity,
            frame_ms = self.audio.frame_period().as_secs_f64() * 1000.0,
            "audio sync started"
        );
        *session = Some(SyncSession {
            id: id.clone(),
            strategy,
            device,
            sensitivity,
            stop,
            stats,
            capture,
            bridge,
        });
        Ok(id)
    }

    /// Stops the running session, if any.
    pub fn stop_sync(&self) -> Result<()> {
        let session = self.lock()?.take();
        if let Some(session) = session {
            let strategy = session.strategy;
            session.shutdown(self.engine.registry())?;
            info!(%strategy, "audio sync stopped");
        }
        Ok(())
    }

    pub fn status(&self) -> Result<SyncStatus> {
        let session = self.lock()?;
        let Some(session) = session.as_ref() else {
            return Ok(SyncStatus::default());
        };
        Ok(SyncStatus {
            active: self.engine.registry().is_active(session.id.as_str())?,
            strategy: Some(session.strategy),
            device: session.device,
            sensitivity: Some(session.sensitivity),
            capture: session.stats.snapshot(),
        })
    }

    /// Spawns the capture thread and waits until it has opened the device.
    fn spawn_capture(
        &self,
        device: Option<usize>,
        publisher: EventPublisher,
        stop: Arc<AtomicBool>,
        stats: Arc<CaptureStats>,
    ) -> Result<JoinHandle<()>> {
        let (opened_tx, opened_rx) = bounded::<Result<()>>(1);
        let backend = self.backend.clone();
        let audio = self.audio.clone();
        let analysis = self.analysis.clone();
        let thread_stop = stop.clone();

        let capture = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let source = match backend.open_input(device, &audio) {
                    Ok(source) => {
                        let _ = opened_tx.send(Ok(()));
                        source
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };
                CaptureLoop::new(source, AnalysisEngine::new(&analysis), publisher, stats)
                    .with_backoff(audio.read_backoff())
                    .run(&thread_stop);
            })?;

        match opened_rx.recv_timeout(self.audio.open_timeout()) {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(err)) => {
                warn!(?device, error = %err, "audio device could not be opened");
                let _ = capture.join();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                // the thread exits on its own once the open call returns
                stop.store(true, Ordering::Release);
                Err(LightSyncError::DeviceUnavailable(format!(
                    "device did not open within {} ms",
                    self.audio.open_timeout_ms
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = capture.join();
                Err(LightSyncError::DeviceUnavailable(
                    "audio capture thread exited while opening the device".to_string(),
                ))
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<SyncSession>>> {
        self.session
            .lock()
            .map_err(|_| LightSyncError::Poisoned("audio sync session"))
    }
}

impl Drop for AudioSync {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(session) = session {
            if let Err(err) = session.shutdown(self.engine.registry()) {
                warn!(error = %err, "audio sync did not shut down cleanly");
            }
        }
    }
}
