//! Safe wrapper around libchromaprint
//!
//! Exposes the raw sub-fingerprint stream and chromaprint's own simhash of
//! it. The context is freed on drop and is not shared between threads.

use std::os::raw::{c_int, c_void};
use thiserror::Error;

// Linked for its build script, which locates or builds libchromaprint
use chromaprint_sys_next as _;

mod ffi {
    use super::*;

    pub type ChromaprintContextPtr = *mut c_void;

    /// `CHROMAPRINT_ALGORITHM_DEFAULT` (TEST2)
    pub const CHROMAPRINT_ALGORITHM_DEFAULT: c_int = 1;

    #[link(name = "chromaprint")]
    extern "C" {
        pub fn chromaprint_new(algorithm: c_int) -> ChromaprintContextPtr;
        pub fn chromaprint_free(ctx: ChromaprintContextPtr);
        pub fn chromaprint_start(ctx: ChromaprintContextPtr, sample_rate: c_int, num_channels: c_int) -> c_int;
        pub fn chromaprint_feed(ctx: ChromaprintContextPtr, data: *const i16, size: c_int) -> c_int;
        pub fn chromaprint_finish(ctx: ChromaprintContextPtr) -> c_int;
        pub fn chromaprint_get_raw_fingerprint(
            ctx: ChromaprintContextPtr,
            fingerprint: *mut *mut u32,
            size: *mut c_int,
        ) -> c_int;
        pub fn chromaprint_hash_fingerprint(fp: *const u32, size: c_int, hash: *mut u32) -> c_int;
        pub fn chromaprint_dealloc(ptr: *mut c_void);
    }
}

/// Errors reported by libchromaprint
#[derive(Debug, Error)]
pub enum ChromaprintError {
    #[error("Failed to create Chromaprint context")]
    ContextCreationFailed,

    #[error("Invalid sample rate: {0} Hz (must be 8000-192000 Hz)")]
    InvalidSampleRate(u32),

    #[error("Failed to start fingerprinting")]
    StartFailed,

    #[error("Failed to feed audio data")]
    FeedFailed,

    #[error("Failed to finish fingerprinting")]
    FinishFailed,

    #[error("Failed to read raw fingerprint")]
    RawFingerprintFailed,

    #[error("Failed to hash fingerprint")]
    HashFailed,
}

pub type Result<T> = std::result::Result<T, ChromaprintError>;

/// Owned chromaprint context (default algorithm)
pub struct ChromaprintContext {
    ctx: ffi::ChromaprintContextPtr,
}

impl ChromaprintContext {
    pub fn new() -> Result<Self> {
        let ctx = unsafe { ffi::chromaprint_new(ffi::CHROMAPRINT_ALGORITHM_DEFAULT) };
        if ctx.is_null() {
            return Err(ChromaprintError::ContextCreationFailed);
        }
        Ok(Self { ctx })
    }

    /// Raw 32-bit sub-fingerprints of mono f32 audio
    ///
    /// Short inputs yield an empty vector rather than an error.
    pub fn raw_fingerprint(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<u32>> {
        if !(8000..=192000).contains(&sample_rate) {
            return Err(ChromaprintError::InvalidSampleRate(sample_rate));
        }

        if unsafe { ffi::chromaprint_start(self.ctx, sample_rate as c_int, 1) } == 0 {
            return Err(ChromaprintError::StartFailed);
        }

        let pcm = convert_f32_to_i16(samples);
        // Fed in chunks so the length always fits a C int
        for chunk in pcm.chunks(1 << 20) {
            if unsafe { ffi::chromaprint_feed(self.ctx, chunk.as_ptr(), chunk.len() as c_int) } == 0 {
                return Err(ChromaprintError::FeedFailed);
            }
        }

        if unsafe { ffi::chromaprint_finish(self.ctx) } == 0 {
            return Err(ChromaprintError::FinishFailed);
        }

        let mut raw: *mut u32 = std::ptr::null_mut();
        let mut size: c_int = 0;
        if unsafe { ffi::chromaprint_get_raw_fingerprint(self.ctx, &mut raw, &mut size) } == 0 {
            return Err(ChromaprintError::RawFingerprintFailed);
        }
        if raw.is_null() {
            return Ok(Vec::new());
        }

        let fingerprint = unsafe { std::slice::from_raw_parts(raw, size.max(0) as usize).to_vec() };
        unsafe { ffi::chromaprint_dealloc(raw as *mut c_void) };

        Ok(fingerprint)
    }
}

impl Drop for ChromaprintContext {
    fn drop(&mut self) {
        unsafe { ffi::chromaprint_free(self.ctx) }
    }
}

/// Chromaprint simhash: bit `i` is set when more than half of the
/// sub-fingerprints have bit `i` set
pub fn hash_fingerprint(raw: &[u32]) -> Result<u32> {
    let mut hash = 0u32;
    if unsafe { ffi::chromaprint_hash_fingerprint(raw.as_ptr(), raw.len() as c_int, &mut hash) } == 0 {
        return Err(ChromaprintError::HashFailed);
    }
    Ok(hash)
}

/// f32 [-1.0, 1.0] to i16 PCM, clamping out-of-range samples
fn convert_f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).round().clamp(-32768.0, 32767.0) as i16)
        .collect()
}
