use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioSource,
    config::{AnalysisConfig, BandConfig},
    PulseVizError, Result,
};

/// Largest value a snapshot magnitude can take (8-bit depth convention).
pub const MAX_MAGNITUDE: f32 = 255.0;

/// One frequency-domain reading of the playing track.
///
/// `magnitudes` holds one value per analysis bin in `[0, 255]`. Snapshots are
/// recomputed on every sampling call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencySnapshot {
    pub magnitudes: Vec<f32>,
}

/// Normalised band intensities derived from a [`FrequencySnapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBands {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

impl FrequencyBands {
    /// Fixed values reported while nothing is playing.
    pub const IDLE: Self = Self {
        low: 0.0,
        mid: 0.0,
        high: 0.0,
    };
}

/// Maps a frequency in Hz onto an analysis bin index, clamped to the valid
/// bin range. Monotonically non-decreasing in `hz`.
pub fn bin_index(hz: f32, buffer_length: usize, sample_rate: u32) -> usize {
    if buffer_length == 0 || sample_rate == 0 {
        return 0;
    }
    let raw = (f64::from(hz.max(0.0)) * buffer_length as f64 / f64::from(sample_rate)) as usize;
    raw.min(buffer_length - 1)
}

/// Inclusive mean of `magnitudes[start..=end]`.
fn average_range(magnitudes: &[f32], start: usize, end: usize) -> Result<f32> {
    if end < start || end >= magnitudes.len() {
        return Err(PulseVizError::InvalidRange { start, end });
    }
    let sum: f32 = magnitudes[start..=end].iter().sum();
    Ok(sum / (end - start + 1) as f32)
}

#[derive(Debug, Clone, Copy)]
struct BandRanges {
    low: (usize, usize),
    mid: (usize, usize),
    high: (usize, usize),
}

/// Converts the playing track's spectrum into low/mid/high intensities.
///
/// The analyzer owns the FFT primitive: each sampling call windows the
/// samples behind the playback head, transforms them, maps the magnitudes
/// into an 8-bit style snapshot the way a Web Audio analyser node would
/// (dB range mapping plus exponential smoothing across calls), then averages
/// the configured band ranges and normalises by [`MAX_MAGNITUDE`].
///
/// Band bin ranges depend on the track's sample rate, so [`configure`]
/// must run again on every track load before sampling resumes.
///
/// [`configure`]: SpectrumAnalyzer::configure
pub struct SpectrumAnalyzer {
    bands: BandConfig,
    config: AnalysisConfig,
    buffer_length: usize,
    sample_rate: u32,
    ranges: Option<BandRanges>,
    smoothed: Vec<f32>,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SpectrumAnalyzer {
    pub fn new(bands: BandConfig, config: AnalysisConfig, buffer_length: usize) -> Self {
        Self {
            bands,
            config,
            buffer_length: buffer_length.max(1),
            sample_rate: 0,
            ranges: None,
            smoothed: Vec::new(),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Recomputes the band bin ranges for a track's sample rate and clears
    /// the smoothing state. Must be called whenever the loaded track changes.
    pub fn configure(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(PulseVizError::NotReady("sample rate is not known yet"));
        }

        let low_start = bin_index(self.bands.low_hz, self.buffer_length, sample_rate);
        let low_end = bin_index(self.bands.mid_hz, self.buffer_length, sample_rate);
        let mid_start = low_end;
        let mid_end = bin_index(self.bands.high_hz, self.buffer_length, sample_rate);
        let high_start = mid_end;
        let high_end = self.buffer_length - 1;

        let ranges = BandRanges {
            low: (low_start, low_end),
            mid: (mid_start, mid_end),
            high: (high_start, high_end),
        };
        for (start, end) in [ranges.low, ranges.mid, ranges.high] {
            if end < start {
                return Err(PulseVizError::InvalidRange { start, end });
            }
        }

        self.sample_rate = sample_rate;
        self.ranges = Some(ranges);
        self.smoothed.clear();
        self.smoothed.resize(self.buffer_length, 0.0);
        tracing::debug!(
            sample_rate,
            low = ?ranges.low,
            mid = ?ranges.mid,
            high = ?ranges.high,
            "band bin ranges configured"
        );
        Ok(())
    }

    /// Samples the source's spectrum and reduces it to band intensities.
    ///
    /// The source must be playing; idle consumers use
    /// [`FrequencyBands::IDLE`] instead of calling this.
    pub fn sample(&mut self, source: &AudioSource) -> Result<FrequencyBands> {
        let buffer = source
            .buffer()
            .ok_or(PulseVizError::NotReady("no track loaded"))?;
        if !source.is_playing() {
            return Err(PulseVizError::NotReady("source is not playing"));
        }

        let snapshot = self.snapshot_at(buffer.samples(), buffer.sample_rate(), source.position_ms())?;
        self.bands_from(&snapshot)
    }

    /// Reduces a snapshot to normalised band intensities.
    pub fn bands_from(&self, snapshot: &FrequencySnapshot) -> Result<FrequencyBands> {
        let ranges = self
            .ranges
            .ok_or(PulseVizError::NotReady("analyzer is not configured"))?;

        let low = average_range(&snapshot.magnitudes, ranges.low.0, ranges.low.1)?;
        let mid = average_range(&snapshot.magnitudes, ranges.mid.0, ranges.mid.1)?;
        let high = average_range(&snapshot.magnitudes, ranges.high.0, ranges.high.1)?;

        Ok(FrequencyBands {
            low: low / MAX_MAGNITUDE,
            mid: mid / MAX_MAGNITUDE,
            high: high / MAX_MAGNITUDE,
        })
    }

    /// Computes the frequency snapshot for the window of samples ending at
    /// `position_ms`. Windows that reach past the start of the buffer are
    /// zero padded on the left.
    pub fn snapshot_at(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        position_ms: f64,
    ) -> Result<FrequencySnapshot> {
        if self.ranges.is_none() {
            return Err(PulseVizError::NotReady("analyzer is not configured"));
        }

        let window_len = self.buffer_length * 2;
        let fft = Self::prepare_fft(&mut self.fft_planner, &mut self.fft, window_len)?;

        let head = ((position_ms / 1000.0) * f64::from(sample_rate)) as usize;
        let end = head.min(samples.len());
        let start = end.saturating_sub(window_len);
        let tail = &samples[start..end];

        fft.input.fill(0.0);
        let offset = window_len - tail.len();
        for (index, value) in tail.iter().enumerate() {
            fft.input[offset + index] = *value * hann_value(offset + index, window_len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 2.0 / window_len as f32;
        let db_span = (self.config.max_db - self.config.min_db).max(f32::EPSILON);
        let smoothing = self.config.smoothing.clamp(0.0, 1.0);
        let mut magnitudes = Vec::with_capacity(self.buffer_length);
        for (index, bin) in fft.spectrum.iter().take(self.buffer_length).enumerate() {
            let amplitude = bin.norm() * scale;
            let smoothed = smoothing * self.smoothed[index] + (1.0 - smoothing) * amplitude;
            self.smoothed[index] = smoothed;

            let db = 20.0 * smoothed.max(1e-12).log10();
            let level = (db - self.config.min_db) / db_span;
            magnitudes.push((level * MAX_MAGNITUDE).clamp(0.0, MAX_MAGNITUDE));
        }

        Ok(FrequencySnapshot { magnitudes })
    }

    fn prepare_fft<'a>(
        planner: &mut RealFftPlanner<f32>,
        slot: &'a mut Option<FftResources>,
        size: usize,
    ) -> Result<&'a mut FftResources> {
        let rebuild = slot.as_ref().map(|fft| fft.size != size).unwrap_or(true);

        if rebuild {
            let plan = planner.plan_fft_forward(size);
            let scratch = plan.make_scratch_vec();
            let spectrum = plan.make_output_vec();
            let input = plan.make_input_vec();
            *slot = Some(FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            });
        }

        Ok(slot.as_mut().expect("fft resources must exist"))
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("bands", &self.bands)
            .field("buffer_length", &self.buffer_length)
            .field("sample_rate", &self.sample_rate)
            .field("configured", &self.ranges.is_some())
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;

    fn analyzer(sample_rate: u32) -> SpectrumAnalyzer {
        let mut analyzer =
            SpectrumAnalyzer::new(BandConfig::default(), AnalysisConfig::default(), 1024);
        analyzer.configure(sample_rate).unwrap();
        analyzer
    }

    #[test]
    fn bin_index_is_monotonic_and_in_range() {
        let mut previous = 0;
        for hz in (0..22_050).step_by(50) {
            let index = bin_index(hz as f32, 1024, 44_100);
            assert!(index < 1024);
            assert!(index >= previous);
            previous = index;
        }
        assert_eq!(bin_index(1_000_000.0, 1024, 44_100), 1023);
    }

    #[test]
    fn low_band_bins_match_hand_computed_reference() {
        assert_eq!(bin_index(15.0, 1024, 44_100), 0);
        assert_eq!(bin_index(250.0, 1024, 44_100), 5);
    }

    #[test]
    fn band_average_matches_hand_computed_reference() {
        let analyzer = analyzer(44_100);

        let mut magnitudes = vec![0.0; 1024];
        for (index, value) in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0].into_iter().enumerate() {
            magnitudes[index] = value;
        }

        let bands = analyzer
            .bands_from(&FrequencySnapshot { magnitudes })
            .unwrap();
        let expected = (10.0 + 20.0 + 30.0 + 40.0 + 50.0 + 60.0) / 6.0 / MAX_MAGNITUDE;
        assert!((bands.low - expected).abs() < 1e-6);
    }

    #[test]
    fn bands_stay_normalised_for_any_snapshot() {
        let analyzer = analyzer(48_000);
        let magnitudes: Vec<f32> = (0..1024).map(|i| ((i * 37) % 256) as f32).collect();

        let bands = analyzer
            .bands_from(&FrequencySnapshot { magnitudes })
            .unwrap();
        for value in [bands.low, bands.mid, bands.high] {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn sampling_requires_configuration_and_playback() {
        let mut analyzer =
            SpectrumAnalyzer::new(BandConfig::default(), AnalysisConfig::default(), 1024);
        let mut source = crate::audio::AudioSource::new();

        assert!(matches!(
            analyzer.sample(&source),
            Err(PulseVizError::NotReady(_))
        ));

        source.load(AudioBuffer::new(vec![0.1; 44_100], 44_100).unwrap());
        assert!(matches!(
            analyzer.sample(&source),
            Err(PulseVizError::NotReady(_))
        ));

        analyzer.configure(44_100).unwrap();
        source.play().unwrap();
        let bands = analyzer.sample(&source).unwrap();
        for value in [bands.low, bands.mid, bands.high] {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let bands = BandConfig {
            low_hz: 15.0,
            mid_hz: 5_000.0,
            high_hz: 250.0,
        };
        let mut analyzer = SpectrumAnalyzer::new(bands, AnalysisConfig::default(), 1024);

        assert!(matches!(
            analyzer.configure(44_100),
            Err(PulseVizError::InvalidRange { .. })
        ));
    }

    #[test]
    fn snapshot_magnitudes_stay_in_byte_range() {
        let mut analyzer = analyzer(8_000);
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 8_000.0).sin())
            .collect();

        let snapshot = analyzer.snapshot_at(&samples, 8_000, 1_500.0).unwrap();
        assert_eq!(snapshot.magnitudes.len(), 1024);
        for value in snapshot.magnitudes {
            assert!((0.0..=MAX_MAGNITUDE).contains(&value));
        }
    }
}
