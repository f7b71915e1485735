use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub bands: BandConfig,
    pub analysis: AnalysisConfig,
    pub tempo: TempoConfig,
}

impl AppConfig {
    /// Reads a configuration file, filling unspecified fields with defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persists the configuration as pretty-printed JSON.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Fallback sample rate used before a track is loaded. The rate of the
    /// decoded buffer always takes precedence once one arrives.
    pub sample_rate: u32,
    /// Number of frequency bins in a spectrum snapshot. Must be a power of
    /// two; the FFT window spans twice this many samples.
    pub buffer_length: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_length: 1024,
        }
    }
}

/// Frequency thresholds that split the spectrum into the low/mid/high bands.
///
/// The values are tunable rather than load-bearing: the low band covers
/// `[low_hz, mid_hz]`, mid covers `[mid_hz, high_hz]` and high runs from
/// `high_hz` up to the last bin. Overlapping or unusual splits are accepted as
/// long as each range keeps a non-negative width once mapped onto bins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub low_hz: f32,
    pub mid_hz: f32,
    pub high_hz: f32,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            low_hz: 15.0,
            mid_hz: 250.0,
            high_hz: 15_000.0,
        }
    }
}

/// Tuning knobs for converting raw FFT output into 8-bit style magnitudes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Magnitudes at or below this level map to snapshot value 0.
    pub min_db: f32,
    /// Magnitudes at or above this level map to snapshot value 255.
    pub max_db: f32,
    /// Exponential smoothing constant applied across successive snapshots,
    /// in `[0, 1)`. 0 disables smoothing entirely.
    pub smoothing: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_db: -100.0,
            max_db: -30.0,
            smoothing: 0.8,
        }
    }
}

/// Parameters of the tempo estimator and beat scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Candidate tempi below this are doubled until they fit the window.
    pub min_bpm: f32,
    /// Candidate tempi above this are halved until they fit the window.
    pub max_bpm: f32,
    /// Hard positivity floor applied to any estimate before it is published.
    pub bpm_floor: f32,
    /// Beat interval reported before a detection pass has resolved, so that
    /// dependent animation durations stay well-defined.
    pub default_beat_interval_ms: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 90.0,
            max_bpm: 180.0,
            bpm_floor: 30.0,
            default_beat_interval_ms: 500.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let config = AppConfig::default();
        assert_eq!(config.audio.buffer_length, 1024);
        assert_eq!(config.bands.low_hz, 15.0);
        assert_eq!(config.bands.mid_hz, 250.0);
        assert_eq!(config.tempo.default_beat_interval_ms, 500.0);
    }

    #[test]
    fn partial_json_fills_remaining_fields() {
        let config: AppConfig =
            serde_json::from_str(r#"{"bands": {"mid_hz": 300.0}}"#).expect("valid config");
        assert_eq!(config.bands.mid_hz, 300.0);
        assert_eq!(config.bands.low_hz, 15.0);
        assert_eq!(config.audio.sample_rate, 44_100);
    }
}
