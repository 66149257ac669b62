//! Acoustic fingerprinting
//!
//! Produces a 64-bit perceptual hash of the first two minutes of a file.
//! Audio is decoded to mono, resampled to `CANONICAL_SAMPLE_RATE` and run
//! through chromaprint. The raw sub-fingerprints are split into two halves
//! in time and each half is reduced with chromaprint's bitwise-majority
//! simhash; the leading half forms the high 32 bits.
//!
//! A majority bit only changes when a flipped sub-fingerprint bit lands on a
//! column that is exactly balanced, so the small numeric differences left by
//! resampling a re-encode almost never reach the hash.

use crate::ffi::chromaprint::{self, ChromaprintContext, ChromaprintError};
use crate::utils::{decode_audio_file, to_canonical_rate, CANONICAL_SAMPLE_RATE};
use std::path::Path;
use thiserror::Error;

/// Shortest signal accepted, in canonical-rate frames (3 s)
const MIN_FRAMES: usize = CANONICAL_SAMPLE_RATE as usize * 3;

/// Fewest sub-fingerprints per half for a meaningful majority
const MIN_SUBPRINTS_PER_HALF: usize = 4;

/// Fingerprinting errors
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Failed to decode audio: {0}")]
    DecodeError(String),

    #[error("Failed to resample audio: {0}")]
    ResampleError(String),

    #[error("Chromaprint error: {0}")]
    ChromaprintError(#[from] ChromaprintError),

    #[error("Audio too short ({frames} frames, minimum {MIN_FRAMES} required)")]
    AudioTooShort { frames: usize },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Audio fingerprinter
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    /// Use first N seconds for fingerprinting (default: 120 seconds)
    duration_seconds: u32,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            duration_seconds: 120,
        }
    }

    /// Set fingerprint duration
    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// Fingerprint an audio file
    pub fn fingerprint_file(&self, audio_path: &Path) -> Result<i64, FingerprintError> {
        if !audio_path.is_file() {
            return Err(FingerprintError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a regular file", audio_path.display()),
            )));
        }

        let decoded = decode_audio_file(audio_path, Some(self.duration_seconds))
            .map_err(|e| FingerprintError::DecodeError(format!("{:#}", e)))?;

        self.fingerprint_pcm(&decoded.samples, decoded.sample_rate)
    }

    /// Fingerprint mono f32 PCM at any sample rate
    pub fn fingerprint_pcm(&self, samples: &[f32], sample_rate: u32) -> Result<i64, FingerprintError> {
        let mut canonical = if sample_rate == CANONICAL_SAMPLE_RATE {
            samples.to_vec()
        } else {
            tracing::debug!(from = sample_rate, to = CANONICAL_SAMPLE_RATE, "Resampling before hashing");
            to_canonical_rate(samples, sample_rate)
                .map_err(|e| FingerprintError::ResampleError(format!("{:#}", e)))?
        };

        canonical.truncate(CANONICAL_SAMPLE_RATE as usize * self.duration_seconds as usize);

        if canonical.len() < MIN_FRAMES {
            return Err(FingerprintError::AudioTooShort {
                frames: canonical.len(),
            });
        }

        let raw = ChromaprintContext::new()?.raw_fingerprint(&canonical, CANONICAL_SAMPLE_RATE)?;
        if raw.len() < 2 * MIN_SUBPRINTS_PER_HALF {
            return Err(FingerprintError::AudioTooShort {
                frames: canonical.len(),
            });
        }

        tracing::trace!(subprints = raw.len(), "Computed raw chromaprint");
        Ok(reduce_raw_fingerprint(&raw)?)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Simhash of each temporal half, leading half in the high bits
fn reduce_raw_fingerprint(raw: &[u32]) -> Result<i64, ChromaprintError> {
    let (head, tail) = raw.split_at(raw.len() / 2);
    let hash = (u64::from(chromaprint::hash_fingerprint(head)?) << 32) | u64::from(chromaprint::hash_fingerprint(tail)?);
    // Stored in a signed INTEGER column; the bit pattern is what matters
    Ok(hash as i64)
}
