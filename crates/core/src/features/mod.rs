use serde::{Deserialize, Serialize};

use crate::{analysis::FrequencyBands, tempo::BeatEvent};

/// Amplitude reported to consumers while nothing is playing.
pub const IDLE_AMPLITUDE: f32 = 1.0;
/// Frequency parameter reported to consumers while nothing is playing.
pub const IDLE_FREQUENCY: f32 = 0.8;

/// Read-only feature set published once per display tick.
///
/// While playing, `bands` carries the live spectrum reduction and
/// `last_beat` the most recent beat notification. While idle the frame holds
/// the documented fixed fallback ([`FrequencyBands::IDLE`] plus
/// [`IDLE_AMPLITUDE`]/[`IDLE_FREQUENCY`]); stale playing-state values are
/// never re-published.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub bands: FrequencyBands,
    pub is_playing: bool,
    /// Current beat interval in milliseconds; never zero.
    pub beat_interval_ms: f32,
    pub last_beat: Option<BeatEvent>,
}

/// Aggregates analyzer and tempo output into the per-tick frame handed to
/// the visualization layer.
#[derive(Debug, Default)]
pub struct FeaturePublisher {
    frame: FeatureFrame,
}

impl FeaturePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a live frame. The beat carries over from previous ticks
    /// until a newer one fires, so consumers can read it between beats.
    pub fn publish_playing(
        &mut self,
        bands: FrequencyBands,
        beat_interval_ms: f32,
        beats: &[BeatEvent],
    ) {
        self.frame.bands = bands;
        self.frame.is_playing = true;
        self.frame.beat_interval_ms = beat_interval_ms;
        if let Some(latest) = beats.last() {
            self.frame.last_beat = Some(*latest);
        }
    }

    /// Publishes the idle fallback frame.
    pub fn publish_idle(&mut self, beat_interval_ms: f32) {
        self.frame = FeatureFrame {
            bands: FrequencyBands::IDLE,
            is_playing: false,
            beat_interval_ms,
            last_beat: None,
        };
    }

    /// Keeps beat bookkeeping current on a tick whose band sampling was
    /// skipped.
    pub fn publish_beats(&mut self, beat_interval_ms: f32, beats: &[BeatEvent]) {
        self.frame.beat_interval_ms = beat_interval_ms;
        if let Some(latest) = beats.last() {
            self.frame.last_beat = Some(*latest);
        }
    }

    pub fn frame(&self) -> &FeatureFrame {
        &self.frame
    }
}
