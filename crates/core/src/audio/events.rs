//! Bounded, non-blocking handoff from the capture thread to the light bridge.
//!
//! The capture side never waits: when the queue is full the oldest event is
//! discarded to make room, so the bridge always sees the freshest audio.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::analysis::AudioFeatures;

/// What the bridge can subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioEvent {
    Beat { timestamp: f64, tempo_bpm: f32 },
    Features(AudioFeatures),
    Amplitude { timestamp: f64, amplitude: f32 },
}

impl AudioEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Beat { timestamp, .. } | Self::Amplitude { timestamp, .. } => *timestamp,
            Self::Features(features) => features.timestamp,
        }
    }
}

/// Event classes a consumer wants delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriptions {
    pub beat: bool,
    pub features: bool,
    pub amplitude: bool,
}

impl Subscriptions {
    pub const ALL: Subscriptions = Subscriptions {
        beat: true,
        features: true,
        amplitude: true,
    };

    /// Expands one analysed frame into the subscribed events. Beats come
    /// first so a consumer that falls behind still sees them early.
    pub fn events_for(&self, features: &AudioFeatures) -> Vec<AudioEvent> {
        let mut events = Vec::with_capacity(3);
        if self.beat && features.beat_detected {
            events.push(AudioEvent::Beat {
                timestamp: features.timestamp,
                tempo_bpm: features.tempo_bpm,
            });
        }
        if self.features {
            events.push(AudioEvent::Features(features.clone()));
        }
        if self.amplitude {
            events.push(AudioEvent::Amplitude {
                timestamp: features.timestamp,
                amplitude: features.amplitude,
            });
        }
        events
    }
}

/// Creates a drop-oldest queue holding at most `capacity` events.
pub fn event_queue(capacity: usize, subscriptions: Subscriptions) -> (EventPublisher, Receiver<AudioEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    let publisher = EventPublisher {
        tx,
        evict: rx.clone(),
        subscriptions,
    };
    (publisher, rx)
}

/// Producer half of the audio event queue.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: Sender<AudioEvent>,
    // Same channel as the consumer; used only to evict the oldest entry.
    evict: Receiver<AudioEvent>,
    subscriptions: Subscriptions,
}

impl EventPublisher {
    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions
    }

    /// Queues one event without blocking and returns how many queued events
    /// were discarded to make room for it.
    pub fn publish(&self, event: AudioEvent) -> u64 {
        let mut dropped = 0;
        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(event)) => {
                    if self.evict.try_recv().is_ok() {
                        dropped += 1;
                    }
                    pending = event;
                }
                // unreachable while `evict` is alive
                Err(TrySendError::Disconnected(_)) => return dropped + 1,
            }
        }
    }

    /// Publishes every subscribed event for one frame.
    pub fn publish_frame(&self, features: &AudioFeatures) -> u64 {
        self.subscriptions
            .events_for(features)
            .into_iter()
            .map(|event| self.publish(event))
            .sum()
    }
}
