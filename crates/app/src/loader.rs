//! WAV decoding front-end for the core's track loader seam.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use pulseviz_core::{AudioBuffer, PulseVizError, Result, TrackDescriptor, TrackLoader};

/// Loads tracks from WAV files on disk.
#[derive(Debug, Default)]
pub struct WavLoader;

impl WavLoader {
    pub fn new() -> Self {
        Self
    }
}

impl TrackLoader for WavLoader {
    fn load(&self, descriptor: &TrackDescriptor) -> Result<AudioBuffer> {
        decode_wav(Path::new(&descriptor.locator))
    }
}

/// Decodes a WAV file into a mono, normalised buffer.
pub fn decode_wav(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)
        .map_err(|error| PulseVizError::Load(format!("{}: {error}", path.display())))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|error| PulseVizError::Load(format!("{}: {error}", path.display())))?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|error| PulseVizError::Load(format!("{}: {error}", path.display())))?
        }
    };

    let mono = mix_to_mono(&samples, spec.channels as usize);
    AudioBuffer::new(mono, spec.sample_rate)
}

/// Mixes interleaved samples down to one sample per frame.
pub fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixes_stereo_down_to_mono() {
        let samples = [0.0, 1.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(mix_to_mono(&samples, 2), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn mono_input_passes_through() {
        let samples = [0.1, 0.2, 0.3];
        assert_eq!(mix_to_mono(&samples, 1), samples.to_vec());
    }
}
