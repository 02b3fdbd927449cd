//! Turns audio events into light commands.
//!
//! The bridge runs as an ordinary registry-tracked effect, so audio-driven
//! output is admitted, cancelled and clamped exactly like a manual effect.

use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    analysis::Band,
    audio::{AudioEvent, Subscriptions},
    effects::runner::{dispatch, resolve_targets},
    light::{LightCommand, LightSink, LightState, TargetSelector, BRI_MAX, SAT_MAX},
    registry::EffectLease,
    LightSyncError,
};

const RED: u16 = 0;
const GREEN: u16 = 25_500;
const BLUE: u16 = 46_920;

/// Wake-up interval while no mapping deadline is pending.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// How audio is mapped onto the lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Dominant frequency picks the hue, loudness the brightness.
    #[default]
    FrequencyColor,
    /// Loudness drives brightness only.
    AmplitudeBrightness,
    /// Full brightness on every beat, then a decay.
    BeatFlash,
    /// One light per band: bass red, mid green, treble blue.
    Spectrum,
}

impl SyncStrategy {
    pub const ALL: [SyncStrategy; 4] = [
        Self::FrequencyColor,
        Self::AmplitudeBrightness,
        Self::BeatFlash,
        Self::Spectrum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FrequencyColor => "frequency",
            Self::AmplitudeBrightness => "amplitude",
            Self::BeatFlash => "beat",
            Self::Spectrum => "spectrum",
        }
    }

    /// Event classes the strategy consumes.
    pub fn subscriptions(self) -> Subscriptions {
        match self {
            Self::FrequencyColor | Self::Spectrum => Subscriptions {
                features: true,
                ..Subscriptions::default()
            },
            Self::AmplitudeBrightness => Subscriptions {
                amplitude: true,
                ..Subscriptions::default()
            },
            Self::BeatFlash => Subscriptions {
                beat: true,
                ..Subscriptions::default()
            },
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SyncStrategy {
    type Err = LightSyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "frequency" | "frequency_color" => Ok(Self::FrequencyColor),
            "amplitude" | "amplitude_brightness" => Ok(Self::AmplitudeBrightness),
            "beat" | "beat_flash" => Ok(Self::BeatFlash),
            "spectrum" => Ok(Self::Spectrum),
            other => Err(LightSyncError::msg(format!("unknown sync strategy `{other}`"))),
        }
    }
}

/// Bass red, mids green, highs blue.
pub fn frequency_to_hue(frequency: f32) -> u16 {
    if frequency < 250.0 {
        RED
    } else if frequency < 2000.0 {
        GREEN
    } else {
        BLUE
    }
}

/// Maps amplitude logarithmically (-60 dB..0 dB) onto brightness 50..254.
pub fn amplitude_to_brightness(amplitude: f32) -> u8 {
    const MIN_BRI: f32 = 50.0;
    let amplitude = if amplitude.is_finite() { amplitude } else { 0.0 };
    let level = ((amplitude.max(0.001).log10() + 3.0) / 3.0).clamp(0.0, 1.0);
    (MIN_BRI + (f32::from(BRI_MAX) - MIN_BRI) * level) as u8
}

/// Maps 60..200 BPM onto an effect speed of 0.5..3.0.
pub fn tempo_to_effect_speed(bpm: f32) -> f32 {
    let bpm = if bpm.is_finite() { bpm.clamp(60.0, 200.0) } else { 60.0 };
    0.5 + (bpm - 60.0) / 140.0 * 2.5
}

/// One sync strategy's state machine.
pub trait LightMapping: Send {
    fn on_event(&mut self, event: &AudioEvent, targets: &[TargetSelector], now: Instant) -> Vec<LightCommand>;

    /// Time at which [`LightMapping::on_tick`] has work to do, if any.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn on_tick(&mut self, _targets: &[TargetSelector], _now: Instant) -> Vec<LightCommand> {
        Vec::new()
    }
}

pub fn mapping_for(strategy: SyncStrategy, sensitivity: f32) -> Box<dyn LightMapping> {
    match strategy {
        SyncStrategy::FrequencyColor => Box::new(FrequencyColor { sensitivity }),
        SyncStrategy::AmplitudeBrightness => Box::new(AmplitudeBrightness { sensitivity }),
        SyncStrategy::BeatFlash => Box::new(BeatFlash {
            sensitivity,
            decay_at: None,
        }),
        SyncStrategy::Spectrum => Box::new(Spectrum { sensitivity }),
    }
}

fn each(targets: &[TargetSelector], state: LightState) -> Vec<LightCommand> {
    targets
        .iter()
        .map(|target| LightCommand::new(target.clone(), state.clone()))
        .collect()
}

struct FrequencyColor {
    sensitivity: f32,
}

impl LightMapping for FrequencyColor {
    fn on_event(&mut self, event: &AudioEvent, targets: &[TargetSelector], _now: Instant) -> Vec<LightCommand> {
        let AudioEvent::Features(features) = event else {
            return Vec::new();
        };
        let state = LightState {
            on: Some(true),
            hue: Some(frequency_to_hue(features.dominant_frequency)),
            sat: Some(SAT_MAX),
            bri: Some(amplitude_to_brightness(features.amplitude * self.sensitivity)),
            transition: Some(1),
        };
        each(targets, state)
    }
}

struct AmplitudeBrightness {
    sensitivity: f32,
}

impl LightMapping for AmplitudeBrightness {
    fn on_event(&mut self, event: &AudioEvent, targets: &[TargetSelector], _now: Instant) -> Vec<LightCommand> {
        let AudioEvent::Amplitude { amplitude, .. } = event else {
            return Vec::new();
        };
        let bri = amplitude_to_brightness(amplitude * self.sensitivity);
        each(targets, LightState::brightness(bri).with_transition(1))
    }
}

const FLASH_HOLD: Duration = Duration::from_millis(100);
const DECAY_BASE_BRI: f32 = 150.0;

struct BeatFlash {
    sensitivity: f32,
    decay_at: Option<Instant>,
}

/// Flash length for the current tempo. Faster music gets shorter flashes;
/// an unknown tempo keeps the base hold.
fn flash_hold(tempo_bpm: f32) -> Duration {
    if tempo_bpm > 0.0 {
        FLASH_HOLD.div_f64(f64::from(tempo_to_effect_speed(tempo_bpm)))
    } else {
        FLASH_HOLD
    }
}

impl LightMapping for BeatFlash {
    fn on_event(&mut self, event: &AudioEvent, targets: &[TargetSelector], now: Instant) -> Vec<LightCommand> {
        let AudioEvent::Beat { tempo_bpm, .. } = event else {
            return Vec::new();
        };
        self.decay_at = Some(now + flash_hold(*tempo_bpm));
        each(targets, LightState::brightness(BRI_MAX).with_transition(0))
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.decay_at
    }

    fn on_tick(&mut self, targets: &[TargetSelector], now: Instant) -> Vec<LightCommand> {
        match self.decay_at {
            Some(at) if at <= now => {
                self.decay_at = None;
                let bri = (DECAY_BASE_BRI * self.sensitivity).round().clamp(1.0, 254.0) as u8;
                each(targets, LightState::brightness(bri).with_transition(5))
            }
            _ => Vec::new(),
        }
    }
}

const SPECTRUM_BANDS: [(Band, u16); 3] = [(Band::Bass, RED), (Band::Mid, GREEN), (Band::Treble, BLUE)];

struct Spectrum {
    sensitivity: f32,
}

impl LightMapping for Spectrum {
    fn on_event(&mut self, event: &AudioEvent, targets: &[TargetSelector], _now: Instant) -> Vec<LightCommand> {
        let AudioEvent::Features(features) = event else {
            return Vec::new();
        };
        let total = features.band_energy.total();
        targets
            .iter()
            .zip(SPECTRUM_BANDS)
            .map(|(target, (band, hue))| {
                let share = if total > 0.0 {
                    features.band_energy.get(band) / total
                } else {
                    0.0
                };
                let state = LightState {
                    on: Some(true),
                    hue: Some(hue),
                    sat: Some(SAT_MAX),
                    bri: Some(amplitude_to_brightness(share * self.sensitivity)),
                    transition: Some(2),
                };
                LightCommand::new(target.clone(), state)
            })
            .collect()
    }
}

pub(crate) struct BridgeRun {
    pub mapping: Box<dyn LightMapping>,
    pub events: Receiver<AudioEvent>,
    pub sink: Arc<dyn LightSink>,
    pub target: TargetSelector,
    /// Raised when the bridge exits so the capture thread stops too.
    pub capture_stop: Arc<AtomicBool>,
}

#[derive(Debug)]
enum BridgeEnd {
    Cancelled,
    CaptureEnded,
    Fault(LightSyncError),
}

pub(crate) fn run_bridge(lease: EffectLease, mut run: BridgeRun) {
    let ended = match resolve_targets(run.sink.as_ref(), &run.target) {
        Ok(targets) => run.drive(&lease, &targets),
        Err(err) => BridgeEnd::Fault(err),
    };
    run.capture_stop.store(true, Ordering::Release);

    match ended {
        BridgeEnd::Cancelled => info!(effect = %lease.id(), "audio sync stopped"),
        BridgeEnd::CaptureEnded => info!(effect = %lease.id(), "audio capture ended, sync stopped"),
        BridgeEnd::Fault(err) => error!(effect = %lease.id(), error = %err, "audio sync aborted"),
    }
}

impl BridgeRun {
    fn drive(&mut self, lease: &EffectLease, targets: &[TargetSelector]) -> BridgeEnd {
        let wake = lease.token().wake_channel().clone();
        let events = self.events.clone();
        loop {
            let timeout = self
                .mapping
                .next_deadline()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_POLL);

            let commands = select! {
                recv(wake) -> _ => return BridgeEnd::Cancelled,
                recv(events) -> event => match event {
                    Ok(event) => self.mapping.on_event(&event, targets, Instant::now()),
                    Err(_) => return BridgeEnd::CaptureEnded,
                },
                default(timeout) => self.mapping.on_tick(targets, Instant::now()),
            };

            if lease.is_cancelled() {
                return BridgeEnd::Cancelled;
            }
            if let Err(err) = dispatch(self.sink.as_ref(), &commands) {
                return BridgeEnd::Fault(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{AudioFeatures, BandEnergies},
        effects::{EffectKind, GeneratorConfig},
        light::MemorySink,
        registry::{Admission, EffectId, EffectInfo, EffectRegistry},
    };

    fn lights(n: usize) -> Vec<TargetSelector> {
        (1..=n).map(|i| TargetSelector::Light(i.to_string())).collect()
    }

    #[test]
    fn frequency_buckets() {
        assert_eq!(frequency_to_hue(100.0), 0);
        assert_eq!(frequency_to_hue(250.0), 25_500);
        assert_eq!(frequency_to_hue(1999.0), 25_500);
        assert_eq!(frequency_to_hue(2000.0), 46_920);
    }

    #[test]
    fn amplitude_is_log_scaled() {
        assert_eq!(amplitude_to_brightness(0.0), 50);
        assert_eq!(amplitude_to_brightness(0.001), 50);
        assert_eq!(amplitude_to_brightness(1.0), 254);
        assert_eq!(amplitude_to_brightness(5.0), 254);
        // -30 dB sits halfway
        assert!((151..=152).contains(&amplitude_to_brightness(0.0316)));
    }

    #[test]
    fn tempo_maps_onto_speed() {
        assert_eq!(tempo_to_effect_speed(60.0), 0.5);
        assert_eq!(tempo_to_effect_speed(200.0), 3.0);
        assert_eq!(tempo_to_effect_speed(10.0), 0.5);
        assert!((tempo_to_effect_speed(130.0) - 1.75).abs() < 1e-6);
    }

    #[test]
    fn strategy_names_parse() {
        for strategy in SyncStrategy::ALL {
            assert_eq!(strategy.name().parse::<SyncStrategy>().unwrap(), strategy);
        }
        assert_eq!("beat-flash".parse::<SyncStrategy>().unwrap(), SyncStrategy::BeatFlash);
        assert!("disco".parse::<SyncStrategy>().is_err());
    }

    #[test]
    fn beat_flash_decays_after_hold() {
        let mut mapping = mapping_for(SyncStrategy::BeatFlash, 0.5);
        let targets = lights(2);
        let now = Instant::now();

        let flash = mapping.on_event(&AudioEvent::Beat { timestamp: 1.0, tempo_bpm: 0.0 }, &targets, now);
        assert_eq!(flash.len(), 2);
        assert_eq!(flash[0].state.bri, Some(254));
        assert_eq!(mapping.next_deadline(), Some(now + FLASH_HOLD));

        assert!(mapping.on_tick(&targets, now).is_empty());
        let decay = mapping.on_tick(&targets, now + FLASH_HOLD);
        assert_eq!(decay[1].state.bri, Some(75));
        assert_eq!(decay[1].state.transition, Some(5));
        assert_eq!(mapping.next_deadline(), None);
    }

    #[test]
    fn beat_flash_shortens_with_tempo() {
        let mut mapping = mapping_for(SyncStrategy::BeatFlash, 1.0);
        let now = Instant::now();

        mapping.on_event(&AudioEvent::Beat { timestamp: 1.0, tempo_bpm: 60.0 }, &lights(1), now);
        let hold = mapping.next_deadline().unwrap() - now;
        assert!(hold > Duration::from_millis(199) && hold < Duration::from_millis(201));

        mapping.on_event(&AudioEvent::Beat { timestamp: 2.0, tempo_bpm: 200.0 }, &lights(1), now);
        let hold = mapping.next_deadline().unwrap() - now;
        assert!(hold > Duration::from_millis(33) && hold < Duration::from_millis(34));
    }

    #[test]
    fn spectrum_drives_one_light_per_band() {
        let mut mapping = mapping_for(SyncStrategy::Spectrum, 1.0);
        let features = AudioFeatures {
            band_energy: BandEnergies {
                bass: 1.0,
                treble: 1.0,
                ..BandEnergies::default()
            },
            ..AudioFeatures::default()
        };
        let commands = mapping.on_event(&AudioEvent::Features(features), &lights(5), Instant::now());

        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].state.hue, Some(RED));
        assert_eq!(commands[1].state.bri, Some(50));
        assert_eq!(commands[2].state.hue, Some(BLUE));
        assert!(commands[2].state.bri > commands[1].state.bri);
    }

    #[test]
    fn frequency_color_ignores_other_events() {
        let mut mapping = mapping_for(SyncStrategy::FrequencyColor, 1.0);
        let beat = AudioEvent::Beat { timestamp: 0.0, tempo_bpm: 0.0 };
        assert!(mapping.on_event(&beat, &lights(1), Instant::now()).is_empty());
    }

    #[test]
    fn bridge_stops_with_its_capture() {
        let sink = Arc::new(MemorySink::with_lights(2));
        let registry = EffectRegistry::new();
        let (tx, rx) = crossbeam_channel::bounded(4);
        let capture_stop = Arc::new(AtomicBool::new(false));
        let run = BridgeRun {
            mapping: mapping_for(SyncStrategy::AmplitudeBrightness, 1.0),
            events: rx,
            sink: sink.clone(),
            target: TargetSelector::All,
            capture_stop: capture_stop.clone(),
        };
        let info = EffectInfo::new(
            EffectId::new("audio_sync_amplitude"),
            EffectKind::AudioSync,
            GeneratorConfig::default(),
        );
        let Admission::Started(task) = registry
            .try_start(info, move |lease| run_bridge(lease, run))
            .unwrap()
        else {
            panic!("bridge was not admitted");
        };

        tx.send(AudioEvent::Amplitude { timestamp: 0.0, amplitude: 1.0 }).unwrap();
        drop(tx);
        task.join().unwrap();

        assert!(capture_stop.load(Ordering::Acquire));
        assert!(registry.list_active().unwrap().is_empty());
        let commands = sink.commands().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.state.bri == Some(254)));
    }
}
