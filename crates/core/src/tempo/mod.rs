use std::{
    collections::BTreeMap,
    f32::consts::PI,
    fmt,
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

use serde::{Deserialize, Serialize};

use crate::{audio::AudioBuffer, config::TempoConfig, PulseVizError, Result};

const LOW_PASS_HZ: f32 = 150.0;
const PEAK_SKIP_SECONDS: f64 = 0.25;
const MIN_PEAKS: usize = 15;
const NEIGHBOUR_SPAN: usize = 10;
const DEGRADED_PEAK_COUNT: usize = 8;

/// Result of one offline tempo detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f32,
    pub beat_interval_ms: f32,
    /// Playback-clock time of beat phase zero, folded into the first
    /// interval of the track.
    pub origin_ms: f32,
    /// Marks a low-confidence, best-effort result. Never fatal; the
    /// scheduler still gets a usable interval.
    pub degraded: bool,
}

impl TempoEstimate {
    /// Builds an estimate from a tempo, clamping it to the positivity floor.
    pub fn from_bpm(bpm: f32, origin_ms: f32, config: &TempoConfig) -> Self {
        let mut degraded = false;
        let bpm = if bpm.is_finite() && bpm >= config.bpm_floor {
            bpm
        } else {
            degraded = true;
            config.bpm_floor.max(1.0)
        };
        Self {
            bpm,
            beat_interval_ms: 60_000.0 / bpm,
            origin_ms: origin_ms.max(0.0),
            degraded,
        }
    }
}

/// Discrete beat notification delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// 1-based beat number since the track's beat phase origin.
    pub index: u64,
    /// Playback-clock time the beat falls on.
    pub at_ms: f64,
}

/// Scheduler phase of the tempo engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoState {
    /// No usable estimate: nothing to schedule.
    Idle,
    /// Estimate available, playback not running.
    Armed,
    /// Emitting one beat per elapsed interval of playback time.
    Running,
}

/// Handle returned by [`TempoEngine::subscribe`].
pub type SubscriptionId = u64;

struct DetectionTask {
    generation: u64,
    receiver: Receiver<TempoEstimate>,
}

/// Offline tempo estimation plus playback-synchronised beat scheduling.
///
/// Detection runs once per loaded buffer on a background thread; the
/// resulting [`TempoEstimate`] is handed back over a single-use channel and
/// picked up from the tick thread via [`poll_detection`] or
/// [`wait_for_detection`]. Each detection pass increments a generation
/// counter, and a result whose generation no longer matches the current one
/// is discarded, so a track switch can abandon an in-flight pass safely.
///
/// Beat emission is polling based: each tick the engine derives the target
/// beat count as `floor(elapsed / interval)` and emits the beats that were
/// crossed since the previous poll. Deriving the count from total elapsed
/// playback time avoids the cumulative drift a re-armed per-beat timer would
/// pick up from the display loop.
///
/// [`poll_detection`]: TempoEngine::poll_detection
/// [`wait_for_detection`]: TempoEngine::wait_for_detection
pub struct TempoEngine {
    config: TempoConfig,
    state: TempoState,
    estimate: Option<TempoEstimate>,
    emitted_beats: u64,
    generation: u64,
    pending: Option<DetectionTask>,
    subscribers: Vec<(SubscriptionId, Box<dyn FnMut(BeatEvent)>)>,
    next_subscription: SubscriptionId,
}

impl TempoEngine {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            config,
            state: TempoState::Idle,
            estimate: None,
            emitted_beats: 0,
            generation: 0,
            pending: None,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn state(&self) -> TempoState {
        self.state
    }

    pub fn estimate(&self) -> Option<&TempoEstimate> {
        self.estimate.as_ref()
    }

    /// Number of beats emitted for the current track so far.
    pub fn emitted_beats(&self) -> u64 {
        self.emitted_beats
    }

    /// Current beat interval in milliseconds. Always defined: before a
    /// detection pass resolves this falls back to the configured default so
    /// that dependent animation durations never see zero.
    pub fn beat_interval_ms(&self) -> f32 {
        self.estimate
            .map(|estimate| estimate.beat_interval_ms)
            .unwrap_or(self.config.default_beat_interval_ms)
    }

    /// Registers a beat callback. Subscribers are notified in subscription
    /// order on every beat until removed via [`unsubscribe`].
    ///
    /// [`unsubscribe`]: TempoEngine::unsubscribe
    pub fn subscribe(&mut self, callback: impl FnMut(BeatEvent) + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Removes a subscription; returns whether the handle was known.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(handle, _)| *handle != id);
        self.subscribers.len() != before
    }

    /// Spawns a detection pass over the buffer and returns its generation.
    /// A newer call supersedes any pass still in flight.
    pub fn begin_detection(&mut self, buffer: &AudioBuffer) -> u64 {
        self.generation += 1;
        let generation = self.generation;

        let (sender, receiver) = mpsc::channel();
        let samples = buffer.clone();
        let config = self.config;
        thread::spawn(move || {
            let estimate = estimate_tempo(samples.samples(), samples.sample_rate(), &config);
            // The receiver may be gone if a newer track superseded this pass.
            let _ = sender.send(estimate);
        });

        tracing::debug!(generation, "tempo detection started");
        self.pending = Some(DetectionTask {
            generation,
            receiver,
        });
        generation
    }

    /// Non-blocking check for a finished detection pass. Returns the newly
    /// accepted estimate, if one arrived this call.
    pub fn poll_detection(&mut self) -> Option<TempoEstimate> {
        let task = self.pending.as_ref()?;
        match task.receiver.try_recv() {
            Ok(estimate) => {
                let generation = task.generation;
                self.pending = None;
                self.accept(generation, estimate)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("tempo detection task disappeared without a result");
                self.pending = None;
                None
            }
        }
    }

    /// Blocks until the in-flight detection pass resolves. Callers that need
    /// playback to start immediately after loading use this to honour the
    /// detect-before-play ordering.
    pub fn wait_for_detection(&mut self) -> Result<TempoEstimate> {
        let task = self
            .pending
            .take()
            .ok_or(PulseVizError::NotReady("no detection pass in flight"))?;
        let estimate = task
            .receiver
            .recv()
            .map_err(|_| PulseVizError::msg("tempo detection task disappeared without a result"))?;
        self.accept(task.generation, estimate)
            .ok_or(PulseVizError::NotReady(
                "detection result was superseded by a newer track",
            ))
    }

    fn accept(&mut self, generation: u64, estimate: TempoEstimate) -> Option<TempoEstimate> {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding stale tempo estimate"
            );
            return None;
        }

        let was_degraded = estimate.degraded;
        let mut estimate = TempoEstimate::from_bpm(estimate.bpm, estimate.origin_ms, &self.config);
        estimate.degraded = estimate.degraded || was_degraded;
        if estimate.degraded {
            tracing::warn!(bpm = estimate.bpm, "tempo detection degraded, using best effort estimate");
        } else {
            tracing::info!(bpm = estimate.bpm, "tempo locked");
        }

        self.estimate = Some(estimate);
        self.emitted_beats = 0;
        if self.state == TempoState::Idle {
            self.state = TempoState::Armed;
        }
        Some(estimate)
    }

    /// Installs a precomputed estimate directly, arming the scheduler.
    pub fn set_estimate(&mut self, estimate: TempoEstimate) {
        let was_degraded = estimate.degraded;
        let mut estimate = TempoEstimate::from_bpm(estimate.bpm, estimate.origin_ms, &self.config);
        estimate.degraded = estimate.degraded || was_degraded;
        self.estimate = Some(estimate);
        self.emitted_beats = 0;
        self.state = TempoState::Armed;
    }

    /// Transitions `Armed -> Running` when playback starts. Fails fast if no
    /// estimate resolved yet; starting playback before detection completes is
    /// a caller ordering bug.
    pub fn run(&mut self) -> Result<()> {
        if self.estimate.is_none() {
            return Err(PulseVizError::NotReady("tempo estimate not available"));
        }
        self.state = TempoState::Running;
        Ok(())
    }

    /// Suspends beat emission on pause. The beat count and phase origin are
    /// preserved; resuming the same track picks up where it left off.
    pub fn suspend(&mut self) {
        if self.state == TempoState::Running {
            self.state = TempoState::Armed;
        }
    }

    /// Rewinds the beat counter after the track restarts from the beginning.
    pub fn rewind(&mut self) {
        self.emitted_beats = 0;
        self.state = if self.estimate.is_some() {
            TempoState::Armed
        } else {
            TempoState::Idle
        };
    }

    /// Drops all tempo state on a track change.
    pub fn reset(&mut self) {
        self.estimate = None;
        self.pending = None;
        self.emitted_beats = 0;
        self.state = TempoState::Idle;
    }

    /// Emits the beats crossed since the previous poll, given the total
    /// elapsed playback time of the current track. Returns the emitted events
    /// in order; subscribers have already been notified for each.
    pub fn poll(&mut self, elapsed_ms: f64) -> Vec<BeatEvent> {
        if self.state != TempoState::Running {
            return Vec::new();
        }
        let Some(estimate) = self.estimate else {
            return Vec::new();
        };

        let interval = f64::from(estimate.beat_interval_ms);
        let since_origin = elapsed_ms - f64::from(estimate.origin_ms);
        if since_origin < 0.0 || interval <= 0.0 {
            return Vec::new();
        }

        let target = (since_origin / interval).floor() as u64;
        let mut events = Vec::new();
        while self.emitted_beats < target {
            self.emitted_beats += 1;
            let event = BeatEvent {
                index: self.emitted_beats,
                at_ms: f64::from(estimate.origin_ms) + interval * self.emitted_beats as f64,
            };
            for (_, callback) in &mut self.subscribers {
                callback(event);
            }
            events.push(event);
        }
        events
    }
}

impl fmt::Debug for TempoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempoEngine")
            .field("state", &self.state)
            .field("estimate", &self.estimate)
            .field("emitted_beats", &self.emitted_beats)
            .field("generation", &self.generation)
            .field("pending", &self.pending.is_some())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Estimates the tempo of a fully decoded buffer.
///
/// The approach mirrors the common envelope peak-interval method: low-pass
/// the signal so beats dominate, pick peaks at a descending threshold until
/// enough are found, histogram the pairwise peak intervals as tempo
/// candidates folded into the configured BPM window, and take the most
/// common candidate. The beat phase origin is the earliest peak of the
/// winning candidate folded into the first interval.
///
/// Pure and deterministic: the same buffer and configuration always produce
/// the same estimate. Inputs without a usable pulse (silence, noise) resolve
/// to a degraded estimate around the configured default interval instead of
/// failing.
pub fn estimate_tempo(samples: &[f32], sample_rate: u32, config: &TempoConfig) -> TempoEstimate {
    let fallback_bpm = 60_000.0 / config.default_beat_interval_ms.max(1.0);
    let degraded_fallback = TempoEstimate {
        degraded: true,
        ..TempoEstimate::from_bpm(fallback_bpm, 0.0, config)
    };

    if samples.is_empty() || sample_rate == 0 {
        return degraded_fallback;
    }

    let filtered = low_pass(samples, sample_rate, LOW_PASS_HZ);
    let max = filtered.iter().fold(0.0_f32, |max, value| max.max(value.abs()));
    if max <= f32::EPSILON {
        return degraded_fallback;
    }

    let peaks = pick_peaks(&filtered, sample_rate, max);
    if peaks.len() < 2 {
        return degraded_fallback;
    }

    struct Candidate {
        count: u32,
        first_peak: usize,
    }

    // Tempo histogram keyed by BPM rounded to the nearest integer. BTreeMap
    // keeps the iteration order deterministic.
    let mut candidates: BTreeMap<u32, Candidate> = BTreeMap::new();
    for (index, &peak) in peaks.iter().enumerate() {
        for &other in peaks.iter().skip(index + 1).take(NEIGHBOUR_SPAN) {
            let span = other - peak;
            if span == 0 {
                continue;
            }
            let seconds = span as f64 / f64::from(sample_rate);
            let mut bpm = 60.0 / seconds;
            while bpm < f64::from(config.min_bpm) {
                bpm *= 2.0;
            }
            while bpm > f64::from(config.max_bpm) {
                bpm /= 2.0;
            }
            let key = bpm.round() as u32;

            let entry = candidates.entry(key).or_insert(Candidate {
                count: 0,
                first_peak: peak,
            });
            entry.count += 1;
            entry.first_peak = entry.first_peak.min(peak);
        }
    }

    let Some((bpm_key, candidate)) = candidates
        .iter()
        .max_by_key(|(_, candidate)| candidate.count)
        .map(|(key, candidate)| (*key, candidate))
    else {
        return degraded_fallback;
    };

    let degraded = peaks.len() < DEGRADED_PEAK_COUNT || candidate.count < 4;
    let interval_ms = 60_000.0 / f64::from(bpm_key);
    let peak_ms = candidate.first_peak as f64 * 1000.0 / f64::from(sample_rate);
    let origin_ms = (peak_ms % interval_ms) as f32;

    let mut estimate = TempoEstimate::from_bpm(bpm_key as f32, origin_ms, config);
    estimate.degraded = estimate.degraded || degraded;
    estimate
}

/// One-pole low-pass so the beat energy dominates the envelope.
fn low_pass(samples: &[f32], sample_rate: u32, cutoff_hz: f32) -> Vec<f32> {
    let dt = 1.0 / sample_rate as f32;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let alpha = dt / (rc + dt);

    let mut filtered = Vec::with_capacity(samples.len());
    let mut previous = 0.0_f32;
    for &sample in samples {
        previous += alpha * (sample - previous);
        filtered.push(previous);
    }
    filtered
}

/// Collects peak positions, lowering the threshold until enough peaks exist.
/// A refractory gap after each accepted peak keeps one beat from counting
/// twice.
fn pick_peaks(filtered: &[f32], sample_rate: u32, max: f32) -> Vec<usize> {
    let skip = ((f64::from(sample_rate) * PEAK_SKIP_SECONDS) as usize).max(1);

    let mut best: Vec<usize> = Vec::new();
    for step in 0..=12 {
        let threshold = 0.9 - 0.05 * step as f32;
        let limit = threshold * max;

        let mut peaks = Vec::new();
        let mut index = 0;
        while index < filtered.len() {
            if filtered[index].abs() >= limit {
                peaks.push(index);
                index += skip;
            } else {
                index += 1;
            }
        }

        if peaks.len() >= MIN_PEAKS {
            return peaks;
        }
        if peaks.len() > best.len() {
            best = peaks;
        }
    }
    best
}
