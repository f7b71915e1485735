use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{PulseVizError, Result};

/// Decoded audio data shared between playback and analysis.
///
/// Samples are mono, normalised to `[-1.0, 1.0]` and immutable once loaded;
/// switching tracks replaces the whole buffer rather than mutating it. The
/// sample storage is reference counted so the tempo detection task can hold
/// onto it without copying.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if samples.is_empty() {
            return Err(PulseVizError::Load("decoded buffer is empty".into()));
        }
        if sample_rate == 0 {
            return Err(PulseVizError::Load("decoded buffer has no sample rate".into()));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / f64::from(self.sample_rate)
    }
}

/// Playback status of the audio source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Reference to a track before it has been decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub name: String,
    pub locator: String,
}

impl TrackDescriptor {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// Collaborator that resolves a [`TrackDescriptor`] into decoded audio.
///
/// Decoding failures surface as [`PulseVizError::Load`]; the session keeps
/// its previous track when that happens.
pub trait TrackLoader {
    fn load(&self, descriptor: &TrackDescriptor) -> Result<AudioBuffer>;
}

/// In-memory loader used by tests and headless demos.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    tracks: HashMap<String, AudioBuffer>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, buffer: AudioBuffer) {
        self.tracks.insert(locator.into(), buffer);
    }
}

impl TrackLoader for MemoryLoader {
    fn load(&self, descriptor: &TrackDescriptor) -> Result<AudioBuffer> {
        self.tracks
            .get(&descriptor.locator)
            .cloned()
            .ok_or_else(|| PulseVizError::Load(format!("unknown track `{}`", descriptor.locator)))
    }
}

/// Tick-driven playback clock.
///
/// `position_ms` is the read head inside the buffer and wraps when looping;
/// `elapsed_ms` accumulates playback time monotonically and is what the beat
/// scheduler measures against. Neither advances while paused.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackClock {
    pub position_ms: f64,
    pub elapsed_ms: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        self.position_ms = 0.0;
        self.elapsed_ms = 0.0;
    }

    fn advance(&mut self, delta_ms: f64) {
        let delta_ms = delta_ms.max(0.0);
        self.position_ms += delta_ms;
        self.elapsed_ms += delta_ms;
    }
}

/// Owner of the decoded buffer, playback position and play/pause state.
///
/// State is mutated only through the explicit load/play/pause/stop operations
/// below; the spectrum analyzer and tempo engine treat the source as
/// read-only.
#[derive(Debug)]
pub struct AudioSource {
    buffer: Option<AudioBuffer>,
    state: PlaybackState,
    loop_enabled: bool,
    clock: PlaybackClock,
}

impl Default for AudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource {
    pub fn new() -> Self {
        Self {
            buffer: None,
            state: PlaybackState::Stopped,
            loop_enabled: true,
            clock: PlaybackClock::default(),
        }
    }

    /// Replaces the loaded buffer wholesale and rewinds the clock.
    pub fn load(&mut self, buffer: AudioBuffer) {
        self.buffer = Some(buffer);
        self.state = PlaybackState::Stopped;
        self.clock.reset();
    }

    pub fn buffer(&self) -> Option<&AudioBuffer> {
        self.buffer.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Starts or resumes playback. Playing requires a loaded buffer.
    /// Starting from `Stopped` begins at the start of the buffer; resuming
    /// from `Paused` keeps the clock where it was.
    pub fn play(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            return Err(PulseVizError::NotReady("no track loaded"));
        }
        if self.state == PlaybackState::Stopped {
            self.clock.reset();
        }
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Suspends playback without moving the clock.
    pub fn pause(&mut self) {
        if self.state() == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Halts playback and rewinds to the start of the buffer.
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.clock.reset();
    }

    /// Current read position inside the buffer in milliseconds.
    pub fn position_ms(&self) -> f64 {
        self.clock.position_ms
    }

    /// Total playback time accumulated for the current track, excluding time
    /// spent paused or stopped. Keeps growing across loop wraps.
    pub fn elapsed_ms(&self) -> f64 {
        self.clock.elapsed_ms
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.buffer.as_ref().map(AudioBuffer::duration_ms)
    }

    /// Moves the clock forward by one tick's worth of time. Returns the state
    /// after the advance so callers can notice the end of a non-looping track.
    pub fn advance(&mut self, delta_ms: f64) -> PlaybackState {
        if self.state() != PlaybackState::Playing {
            return self.state();
        }
        let Some(duration) = self.duration_ms() else {
            return self.state();
        };

        self.clock.advance(delta_ms);
        if self.clock.position_ms >= duration && duration > 0.0 {
            if self.loop_enabled {
                self.clock.position_ms %= duration;
            } else {
                self.clock.position_ms = duration;
                self.state = PlaybackState::Stopped;
            }
        }
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(seconds: f64, sample_rate: u32) -> AudioBuffer {
        let samples = vec![0.0; (seconds * f64::from(sample_rate)) as usize];
        AudioBuffer::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn playing_requires_a_buffer() {
        let mut source = AudioSource::new();
        assert!(matches!(
            source.play(),
            Err(PulseVizError::NotReady(_))
        ));

        source.load(buffer(1.0, 100));
        source.play().unwrap();
        assert!(source.is_playing());
    }

    #[test]
    fn pause_freezes_both_clocks() {
        let mut source = AudioSource::new();
        source.load(buffer(10.0, 100));
        source.play().unwrap();
        source.advance(400.0);
        source.pause();

        source.advance(1_000.0);
        assert_eq!(source.position_ms(), 400.0);
        assert_eq!(source.elapsed_ms(), 400.0);

        source.play().unwrap();
        source.advance(100.0);
        assert_eq!(source.elapsed_ms(), 500.0);
    }

    #[test]
    fn looping_wraps_position_but_not_elapsed() {
        let mut source = AudioSource::new();
        source.load(buffer(1.0, 100));
        source.set_loop(true);
        source.play().unwrap();

        source.advance(1_500.0);
        assert!(source.is_playing());
        assert_eq!(source.position_ms(), 500.0);
        assert_eq!(source.elapsed_ms(), 1_500.0);
    }

    #[test]
    fn non_looping_track_stops_at_the_end() {
        let mut source = AudioSource::new();
        source.load(buffer(1.0, 100));
        source.set_loop(false);
        source.play().unwrap();

        assert_eq!(source.advance(2_000.0), PlaybackState::Stopped);
        assert_eq!(source.position_ms(), 1_000.0);
    }

    #[test]
    fn load_replaces_the_buffer_and_rewinds() {
        let mut source = AudioSource::new();
        source.load(buffer(1.0, 100));
        source.play().unwrap();
        source.advance(250.0);

        source.load(buffer(2.0, 200));
        assert_eq!(source.state(), PlaybackState::Stopped);
        assert_eq!(source.elapsed_ms(), 0.0);
        assert_eq!(source.buffer().unwrap().sample_rate(), 200);
    }

    #[test]
    fn memory_loader_reports_unknown_tracks() {
        let mut loader = MemoryLoader::new();
        loader.insert("a", buffer(1.0, 100));

        let found = loader.load(&TrackDescriptor::new("A", "a"));
        assert!(found.is_ok());

        let missing = loader.load(&TrackDescriptor::new("B", "b"));
        assert!(matches!(missing, Err(PulseVizError::Load(_))));
    }
}
