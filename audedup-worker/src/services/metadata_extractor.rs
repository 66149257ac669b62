//! Audio tag extraction using lofty
//!
//! Extracts the identity tags (album, MusicBrainz release id, disc, track)
//! and the descriptive tags carried in notifications (title, artist, year).

use audedup_common::db::TrackIdentity;
use audedup_common::events::EventMetadata;
use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;
use std::path::Path;
use thiserror::Error;

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Container or tag parsing failed
    #[error("Failed to read file: {0}")]
    ReadError(String),

    /// I/O error (file read)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Tags read from one audio file; every field may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub album: Option<String>,

    /// MusicBrainz release (album) id
    pub album_id: Option<String>,

    pub disc_number: Option<u32>,
    pub track_number: Option<u32>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub year: Option<u32>,
}

impl TrackTags {
    /// Combine with a fingerprint into the dedup identity tuple
    pub fn identity(&self, acoustic_fingerprint: i64) -> TrackIdentity {
        TrackIdentity {
            acoustic_fingerprint,
            album: self.album.clone(),
            album_id: self.album_id.clone(),
            disc_number: self.disc_number,
            track_number: self.track_number,
        }
    }

    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata {
            album: self.album.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            year: self.year,
        }
    }
}

/// Metadata extractor service
#[derive(Debug, Default, Clone)]
pub struct MetadataExtractor {}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self {}
    }

    /// Identify the container from its header, ignoring the extension
    ///
    /// Returns `None` when lofty does not recognise the format.
    pub fn detect_file_type(&self, file_path: &Path) -> Result<Option<FileType>, MetadataError> {
        let probe = Probe::open(file_path)
            .map_err(|e| MetadataError::ReadError(e.to_string()))?
            .guess_file_type()?;
        Ok(probe.file_type())
    }

    /// Read tags from an audio file
    pub fn extract(&self, file_path: &Path) -> Result<TrackTags, MetadataError> {
        let tagged_file = Probe::open(file_path)
            .map_err(|e| MetadataError::ReadError(e.to_string()))?
            .guess_file_type()?
            .read()
            .map_err(|e| MetadataError::ReadError(e.to_string()))?;

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            tracing::debug!(file = %file_path.display(), "No tags found");
            return Ok(TrackTags::default());
        };

        let tags = TrackTags {
            album: non_empty(tag.album().map(|s| s.to_string())),
            album_id: non_empty(tag.get_string(&ItemKey::MusicBrainzReleaseId).map(str::to_string)),
            disc_number: tag.disk(),
            track_number: tag.track(),
            title: non_empty(tag.title().map(|s| s.to_string())),
            artist: non_empty(tag.artist().map(|s| s.to_string())),
            year: tag.year(),
        };

        tracing::debug!(
            file = %file_path.display(),
            album = ?tags.album,
            disc = ?tags.disc_number,
            track = ?tags.track_number,
            "Extracted tags"
        );

        Ok(tags)
    }

    /// Read tags, degrading to all-absent on any failure
    pub fn extract_or_default(&self, file_path: &Path) -> TrackTags {
        self.extract(file_path).unwrap_or_else(|e| {
            tracing::warn!(file = %file_path.display(), error = %e, "Unreadable tags, continuing without metadata");
            TrackTags::default()
        })
    }
}

/// Empty strings are treated as missing tags
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..8000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_extract_nonexistent_file() {
        let extractor = MetadataExtractor::new();
        assert!(extractor.extract(Path::new("/nonexistent/file.mp3")).is_err());
    }

    #[test]
    fn test_untagged_wav_has_no_tags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.wav");
        write_wav(&path);

        let extractor = MetadataExtractor::new();
        assert_eq!(extractor.detect_file_type(&path).unwrap(), Some(FileType::Wav));
        assert_eq!(extractor.extract(&path).unwrap(), TrackTags::default());
    }

    #[test]
    fn test_text_file_is_not_a_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just some words, nothing audible").unwrap();

        assert_eq!(MetadataExtractor::new().detect_file_type(&path).unwrap(), None);
    }

    #[test]
    fn test_extract_or_default_degrades() {
        let tags = MetadataExtractor::new().extract_or_default(Path::new("/nonexistent/x.flac"));
        assert_eq!(tags, TrackTags::default());
    }

    #[test]
    fn test_identity_carries_tags() {
        let tags = TrackTags {
            album: Some("X".to_string()),
            disc_number: Some(1),
            track_number: Some(3),
            ..Default::default()
        };
        let identity = tags.identity(-42);
        assert_eq!(identity.acoustic_fingerprint, -42);
        assert_eq!(identity.album.as_deref(), Some("X"));
        assert_eq!(identity.album_id, None);
        assert_eq!(identity.disc_number, Some(1));
        assert_eq!(identity.track_number, Some(3));
    }

    #[test]
    fn test_non_empty_filters_blank() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some("A".to_string())), Some("A".to_string()));
    }
}
