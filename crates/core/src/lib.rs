//! Core library for Light Sync.
//!
//! Two coupled subsystems live here. The effect engine runs many cancellable
//! lighting-pattern generators, at most one per effect identity, each on its
//! own thread and all tracked by one [`EffectRegistry`]. The audio pipeline
//! captures fixed-size frames, extracts spectral features, detects beats,
//! estimates tempo and hands events to a bridge that is itself just another
//! registry-tracked effect. Lights are reached only through the
//! [`LightSink`] trait.

pub mod analysis;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod light;
pub mod registry;
pub mod sync;

pub use analysis::{AnalysisEngine, AnalysisSummary, AudioFeatures, FrequencyBandTable};
pub use audio::{default_backend, AudioBackend, AudioFrame, InputDevice, SyntheticBackend};
pub use bridge::SyncStrategy;
pub use config::{AnalysisConfig, AppConfig, AudioConfig, SafetyLimits};
pub use effects::{CustomEffect, EffectKind, GeneratorConfig};
pub use engine::{EffectEngine, StartOutcome};
pub use error::{LightSyncError, Result};
pub use light::{LightSink, LightState, MemorySink, TargetSelector};
pub use registry::{CancelOutcome, EffectId, EffectInfo, EffectRegistry};
pub use sync::{AudioSync, SyncStatus};
