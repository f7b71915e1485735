use crate::{
    analysis::SpectrumAnalyzer,
    audio::{AudioSource, PlaybackState, TrackDescriptor, TrackLoader},
    config::AppConfig,
    features::{FeatureFrame, FeaturePublisher},
    tempo::{BeatEvent, SubscriptionId, TempoEngine, TempoEstimate, TempoState},
    PulseVizError, Result,
};

/// Composition root tying the audio source, spectrum analyzer, tempo engine
/// and feature publisher together.
///
/// The session is the seam the presentation layer talks to: it owns the
/// components and passes them to each other explicitly instead of routing
/// through shared global state. All operations run on the tick thread; the
/// only background work is tempo detection, whose result the session picks
/// up during [`tick`].
///
/// [`tick`]: VizSession::tick
#[derive(Debug)]
pub struct VizSession<L: TrackLoader> {
    loader: L,
    source: AudioSource,
    analyzer: SpectrumAnalyzer,
    tempo: TempoEngine,
    publisher: FeaturePublisher,
    tracks: Vec<TrackDescriptor>,
    current: Option<TrackDescriptor>,
}

impl<L: TrackLoader> VizSession<L> {
    pub fn new(config: &AppConfig, loader: L) -> Self {
        Self {
            loader,
            source: AudioSource::new(),
            analyzer: SpectrumAnalyzer::new(
                config.bands,
                config.analysis,
                config.audio.buffer_length,
            ),
            tempo: TempoEngine::new(config.tempo),
            publisher: FeaturePublisher::new(),
            tracks: Vec::new(),
            current: None,
        }
    }

    /// Adds a track to the selectable catalogue.
    pub fn add_track(&mut self, descriptor: TrackDescriptor) {
        self.tracks.push(descriptor);
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn current_track(&self) -> Option<&TrackDescriptor> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.source.is_playing()
    }

    pub fn beat_interval_ms(&self) -> f32 {
        self.tempo.beat_interval_ms()
    }

    pub fn tempo_state(&self) -> TempoState {
        self.tempo.state()
    }

    pub fn tempo_estimate(&self) -> Option<&TempoEstimate> {
        self.tempo.estimate()
    }

    /// Registers a beat subscriber; see [`TempoEngine::subscribe`].
    pub fn subscribe_beats(
        &mut self,
        callback: impl FnMut(BeatEvent) + 'static,
    ) -> SubscriptionId {
        self.tempo.subscribe(callback)
    }

    pub fn unsubscribe_beats(&mut self, id: SubscriptionId) -> bool {
        self.tempo.unsubscribe(id)
    }

    /// Switches to a new track: pauses playback, decodes the descriptor,
    /// reconfigures the analyzer for the new sample rate and kicks off tempo
    /// detection for the new buffer.
    ///
    /// On a load failure the session is left exactly as it was, still
    /// holding the previous track; the error propagates to the caller that
    /// requested the switch.
    pub fn load_track(&mut self, descriptor: &TrackDescriptor) -> Result<()> {
        if self.source.is_playing() {
            self.pause();
        }

        let buffer = self.loader.load(descriptor)?;
        let sample_rate = buffer.sample_rate();

        self.analyzer.configure(sample_rate)?;
        self.tempo.reset();
        self.tempo.begin_detection(&buffer);
        self.source.load(buffer);
        self.current = Some(descriptor.clone());

        tracing::info!(name = %descriptor.name, sample_rate, "track loaded");
        Ok(())
    }

    /// Blocks until tempo detection for the current track resolves. Used by
    /// callers that want to start playback immediately after loading.
    pub fn wait_for_tempo(&mut self) -> Result<TempoEstimate> {
        self.tempo.wait_for_detection()
    }

    /// Starts or resumes playback. Detection must have resolved first;
    /// playing an unanalysed buffer is an ordering bug and fails fast.
    pub fn play(&mut self) -> Result<()> {
        if self.source.buffer().is_none() {
            return Err(PulseVizError::NotReady("no track loaded"));
        }
        self.tempo.run()?;
        self.source.play()
    }

    /// Pauses playback and suspends beat emission without losing phase.
    pub fn pause(&mut self) {
        self.source.pause();
        self.tempo.suspend();
    }

    /// Stops playback and rewinds both the track and the beat counter.
    pub fn stop(&mut self) {
        self.source.stop();
        self.tempo.rewind();
    }

    /// Runs one display tick: advances the playback clock, polls for a
    /// finished detection pass, emits due beats and publishes the feature
    /// frame.
    ///
    /// A `NotReady` sampling failure skips the band features for this tick
    /// only; beats and the rest of the frame still update.
    pub fn tick(&mut self, delta_ms: f64) -> FeatureFrame {
        self.tempo.poll_detection();

        let state = self.source.advance(delta_ms);
        if state == PlaybackState::Stopped && self.tempo.state() == TempoState::Running {
            // A non-looping track ran out; rewind the beat counter with it.
            self.tempo.rewind();
        }

        if self.source.is_playing() {
            let beats = self.tempo.poll(self.source.elapsed_ms());
            match self.analyzer.sample(&self.source) {
                Ok(bands) => {
                    self.publisher
                        .publish_playing(bands, self.tempo.beat_interval_ms(), &beats)
                }
                Err(error) => {
                    tracing::warn!(%error, "spectrum sampling skipped this tick");
                    self.publisher
                        .publish_beats(self.tempo.beat_interval_ms(), &beats);
                }
            }
        } else {
            self.publisher.publish_idle(self.tempo.beat_interval_ms());
        }

        *self.publisher.frame()
    }

    /// Latest published frame without running a tick.
    pub fn frame(&self) -> &FeatureFrame {
        self.publisher.frame()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::audio::{AudioBuffer, MemoryLoader};

    /// Click track: unit impulses over silence at the given tempo.
    fn click_buffer(bpm: f64, sample_rate: u32, seconds: f64) -> AudioBuffer {
        let total = (seconds * f64::from(sample_rate)) as usize;
        let step = (60.0 / bpm * f64::from(sample_rate)) as usize;
        let mut samples = vec![0.0_f32; total];
        let mut position = 0;
        while position < total {
            samples[position] = 1.0;
            position += step;
        }
        AudioBuffer::new(samples, sample_rate).unwrap()
    }

    fn session_with(tracks: &[(&str, AudioBuffer)]) -> VizSession<MemoryLoader> {
        let mut loader = MemoryLoader::new();
        for (locator, buffer) in tracks {
            loader.insert(*locator, buffer.clone());
        }
        VizSession::new(&AppConfig::default(), loader)
    }

    #[test]
    fn idle_session_publishes_the_fallback_frame() {
        let mut session = session_with(&[]);
        let frame = session.tick(16.0);

        assert!(!frame.is_playing);
        assert_eq!(frame.bands, crate::analysis::FrequencyBands::IDLE);
        assert_eq!(frame.beat_interval_ms, 500.0);
    }

    #[test]
    fn playback_requires_a_resolved_detection() {
        let mut session = session_with(&[]);
        assert!(matches!(
            session.play(),
            Err(PulseVizError::NotReady(_))
        ));
    }

    #[test]
    fn failed_loads_keep_the_previous_track() {
        let mut session = session_with(&[("a", click_buffer(120.0, 1_000, 12.0))]);

        session
            .load_track(&TrackDescriptor::new("A", "a"))
            .unwrap();
        session.wait_for_tempo().unwrap();

        let missing = session.load_track(&TrackDescriptor::new("B", "b"));
        assert!(matches!(missing, Err(PulseVizError::Load(_))));
        assert_eq!(session.current_track().unwrap().locator, "a");
    }

    #[test]
    fn full_pipeline_emits_beats_on_the_playback_clock() {
        let mut session = session_with(&[("a", click_buffer(120.0, 1_000, 12.0))]);
        session
            .load_track(&TrackDescriptor::new("A", "a"))
            .unwrap();
        let estimate = session.wait_for_tempo().unwrap();
        assert!((estimate.bpm - 120.0).abs() < 1.0);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        session.subscribe_beats(move |beat| sink.borrow_mut().push(beat.at_ms));

        session.play().unwrap();
        for _ in 0..40 {
            let frame = session.tick(50.0);
            assert!(frame.is_playing);
            for value in [frame.bands.low, frame.bands.mid, frame.bands.high] {
                assert!((0.0..=1.0).contains(&value));
            }
        }

        let origin = f64::from(estimate.origin_ms);
        let expected: Vec<f64> = (1..=4).map(|beat| origin + 500.0 * beat as f64).collect();
        assert_eq!(*seen.borrow(), expected);
    }

    #[test]
    fn pausing_and_resuming_emits_no_extra_beats() {
        let mut session = session_with(&[("a", click_buffer(120.0, 1_000, 12.0))]);
        session
            .load_track(&TrackDescriptor::new("A", "a"))
            .unwrap();
        session.wait_for_tempo().unwrap();

        let count = Rc::new(RefCell::new(0_u64));
        let sink = count.clone();
        session.subscribe_beats(move |_| *sink.borrow_mut() += 1);

        session.play().unwrap();
        for _ in 0..12 {
            session.tick(50.0);
        }
        let before_pause = *count.borrow();

        session.pause();
        for _ in 0..100 {
            let frame = session.tick(50.0);
            assert!(!frame.is_playing);
        }
        assert_eq!(*count.borrow(), before_pause);

        session.play().unwrap();
        for _ in 0..12 {
            session.tick(50.0);
        }
        assert!(*count.borrow() > before_pause);
    }

    #[test]
    fn switching_tracks_supersedes_the_older_detection() {
        let mut session = session_with(&[
            ("slow", click_buffer(100.0, 1_000, 12.0)),
            ("fast", click_buffer(150.0, 1_000, 12.0)),
        ]);

        session
            .load_track(&TrackDescriptor::new("Slow", "slow"))
            .unwrap();
        session
            .load_track(&TrackDescriptor::new("Fast", "fast"))
            .unwrap();

        let estimate = session.wait_for_tempo().unwrap();
        assert!((estimate.bpm - 150.0).abs() < 1.0);
        assert!((session.beat_interval_ms() - 400.0).abs() < 5.0);
    }

    #[test]
    fn idle_frame_never_leaks_stale_band_values() {
        let mut session = session_with(&[("a", click_buffer(120.0, 1_000, 12.0))]);
        session
            .load_track(&TrackDescriptor::new("A", "a"))
            .unwrap();
        session.wait_for_tempo().unwrap();
        session.play().unwrap();
        for _ in 0..10 {
            session.tick(50.0);
        }

        session.pause();
        let frame = session.tick(50.0);
        assert_eq!(frame.bands, crate::analysis::FrequencyBands::IDLE);
        assert!(frame.last_beat.is_none());
    }
}
