//! Core library for the Pulseviz application.
//!
//! The crate extracts perceptual features from a playing music track and
//! derives a tempo-synchronised beat stream for a reactive display. Each
//! module owns a distinct subsystem: `audio` holds the decoded buffer and
//! playback clock, `analysis` reduces the spectrum to band intensities,
//! `tempo` estimates BPM offline and schedules beat notifications, and
//! `features` aggregates everything into the per-tick frame the
//! visualization layer consumes. `session` wires the pieces together behind
//! a single dependency-injected entry point.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod features;
pub mod session;
pub mod tempo;

pub use analysis::{bin_index, FrequencyBands, FrequencySnapshot, SpectrumAnalyzer, MAX_MAGNITUDE};
pub use audio::{
    AudioBuffer, AudioSource, MemoryLoader, PlaybackClock, PlaybackState, TrackDescriptor,
    TrackLoader,
};
pub use config::{AnalysisConfig, AppConfig, AudioConfig, BandConfig, TempoConfig};
pub use error::{PulseVizError, Result};
pub use features::{FeatureFrame, FeaturePublisher, IDLE_AMPLITUDE, IDLE_FREQUENCY};
pub use session::VizSession;
pub use tempo::{
    estimate_tempo, BeatEvent, SubscriptionId, TempoEngine, TempoEstimate, TempoState,
};
