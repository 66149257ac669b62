//! Utility modules for audedup-worker

pub mod audio_decoder;
pub mod resampler;

pub use audio_decoder::{decode_audio_file, DecodedAudio};
pub use resampler::{resample_mono, to_canonical_rate, CANONICAL_SAMPLE_RATE};
