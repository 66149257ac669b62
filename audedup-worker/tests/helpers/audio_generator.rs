//! Audio Test Fixture Generator
//!
//! WAV fixtures playing a fixed melody of pure notes, so the same
//! "recording" written at different sample rates fingerprints identically.

use std::path::{Path, PathBuf};

/// Configuration for generated audio
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Length of one note
    pub step_seconds: f64,
    /// Number of notes
    pub steps: usize,
    /// Transposes the melody by a minor third per unit to produce different content
    pub pattern_offset: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            step_seconds: 0.5,
            steps: 40,
            pattern_offset: 0,
        }
    }
}

impl AudioConfig {
    pub fn at_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Default::default()
        }
    }
}

fn note(step: usize, pattern_offset: usize) -> f32 {
    const NOTES: [f32; 5] = [220.0, 261.63, 329.63, 392.0, 493.88];
    let transpose = 2f32.powf(3.0 * pattern_offset as f32 / 12.0);
    NOTES[(step * 7 % 11) % NOTES.len()] * transpose
}

/// Generate a 16-bit WAV of the fixture melody
pub fn write_melody_wav(path: &Path, config: &AudioConfig) -> anyhow::Result<PathBuf> {
    let spec = hound::WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let per_step = (config.step_seconds * config.sample_rate as f64) as usize;

    for step in 0..config.steps {
        let freq = note(step, config.pattern_offset);
        for j in 0..per_step {
            let t = (step * per_step + j) as f32 / config.sample_rate as f32;
            let sample = (0.4 * (2.0 * std::f32::consts::PI * freq * t).sin() * i16::MAX as f32) as i16;
            for _ in 0..config.channels {
                writer.write_sample(sample)?;
            }
        }
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Write a non-audio file
pub fn write_text_file(path: &Path, content: &str) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(path.to_path_buf())
}
