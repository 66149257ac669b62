//! Mono resampling using rubato
//!
//! Fingerprints are always computed at `CANONICAL_SAMPLE_RATE`, so the same
//! recording stored at 44.1 kHz and 48 kHz hashes identically.

use anyhow::{Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Sample rate all audio is normalised to before fingerprinting
pub const CANONICAL_SAMPLE_RATE: u32 = 44100;

/// Resample mono audio from `input_rate` to `output_rate`
///
/// Returns a copy without resampling if the rates already match.
pub fn resample_mono(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        debug!("Sample rate already at {}Hz, skipping resample", output_rate);
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    debug!("Resampling from {}Hz to {}Hz", input_rate, output_rate);

    // Whole signal as one chunk: FastFixedIn processes exactly chunk_size frames
    let mut resampler = FastFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        input.len(),
        1,
    )
    .context("Failed to create resampler")?;

    let planar_input = vec![input.to_vec()];
    let mut planar_output = resampler
        .process(&planar_input, None)
        .context("Resampling failed")?;

    let output = planar_output.pop().unwrap_or_default();

    debug!(
        "Resampled {} input frames to {} output frames",
        input.len(),
        output.len()
    );

    Ok(output)
}

/// Resample to `CANONICAL_SAMPLE_RATE`
pub fn to_canonical_rate(input: &[f32], input_rate: u32) -> Result<Vec<f32>> {
    resample_mono(input, input_rate, CANONICAL_SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, seconds: f32, freq: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let output = resample_mono(&input, 44100, 44100).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample_mono(&[], 48000, 44100).unwrap().is_empty());
    }

    #[test]
    fn test_resample_48k_to_canonical_length() {
        let input = sine(48000, 1.0, 440.0);
        let output = to_canonical_rate(&input, 48000).unwrap();

        let expected = CANONICAL_SAMPLE_RATE as i64;
        let diff = (output.len() as i64 - expected).abs();
        assert!(diff < 64, "expected ~{} frames, got {}", expected, output.len());
    }

    #[test]
    fn test_resample_preserves_level() {
        let input = sine(22050, 1.0, 440.0);
        let output = to_canonical_rate(&input, 22050).unwrap();

        let rms = |s: &[f32]| (s.iter().map(|x| x * x).sum::<f32>() / s.len() as f32).sqrt();
        // Skip the edges where the interpolator has no history
        let inner = &output[1000..output.len() - 1000];
        assert!((rms(inner) - rms(&input)).abs() < 0.01);
    }
}
