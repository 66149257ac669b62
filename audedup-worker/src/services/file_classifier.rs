//! Audio/non-audio classification
//!
//! `AudioClassifier` is the seam between the dedup engine and the audio
//! stack. The production implementation sniffs the MIME type from magic
//! bytes (infer), confirms lofty understands the container, then reads tags
//! and computes the fingerprint with symphonia, rubato and chromaprint.
//!
//! Both methods block on file I/O and decoding; callers run them on the
//! blocking thread pool.

use crate::services::fingerprinter::{FingerprintError, Fingerprinter};
use crate::services::metadata_extractor::{MetadataExtractor, TrackTags};
use std::path::Path;

/// Result of inspecting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioProbe {
    /// Recognised audio; tags degrade to absent if unreadable
    Audio(TrackTags),
    /// Not audio, or not a container we can read
    Unsupported(String),
}

/// Decides whether a file is audio and fingerprints it
pub trait AudioClassifier: Send + Sync {
    /// Classify the file. Unreadable files are `Unsupported`, never an error.
    fn probe(&self, path: &Path) -> AudioProbe;

    /// Compute the acoustic fingerprint of a file `probe` accepted
    fn fingerprint(&self, path: &Path) -> Result<i64, FingerprintError>;
}

/// Production classifier backed by infer, lofty and symphonia
#[derive(Debug, Default, Clone)]
pub struct SymphoniaClassifier {
    metadata: MetadataExtractor,
    fingerprinter: Fingerprinter,
}

impl SymphoniaClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = fingerprinter;
        self
    }
}

impl AudioClassifier for SymphoniaClassifier {
    fn probe(&self, path: &Path) -> AudioProbe {
        let mime = match infer::get_from_path(path) {
            Ok(Some(kind)) => kind.mime_type(),
            Ok(None) => return AudioProbe::Unsupported("unrecognised content".to_string()),
            Err(e) => return AudioProbe::Unsupported(format!("unreadable: {}", e)),
        };

        if !mime.starts_with("audio/") {
            return AudioProbe::Unsupported(format!("not audio ({})", mime));
        }

        match self.metadata.detect_file_type(path) {
            Ok(Some(_)) => AudioProbe::Audio(self.metadata.extract_or_default(path)),
            Ok(None) => AudioProbe::Unsupported(format!("unsupported container ({})", mime)),
            Err(e) => AudioProbe::Unsupported(format!("unreadable: {}", e)),
        }
    }

    fn fingerprint(&self, path: &Path) -> Result<i64, FingerprintError> {
        self.fingerprinter.fingerprint_file(path)
    }
}
