//! Classification events and the in-process event bus
//!
//! The dedup engine emits one `ClassificationEvent` per newly classified file,
//! after its record is committed. The notifier and the incremental view
//! reconciliation subscribe through `EventBus`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Classification outcome for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationKind {
    /// First track with this identity tuple
    New,
    /// Identity tuple already held by a non-duplicate track
    Duplicate,
    /// Not classifiable as audio
    Unknown,
}

impl ClassificationKind {
    /// Whether files of this kind appear in the canonical view
    pub fn is_canonical(&self) -> bool {
        matches!(self, ClassificationKind::New | ClassificationKind::Unknown)
    }
}

/// Descriptive tags carried in notifications; any field may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub album: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub year: Option<u32>,
}

/// Outbound event for one classified path
///
/// Serialized form:
/// `{"path": "...", "type": "new", "audioprint": "123", "metadata": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    pub path: String,

    #[serde(rename = "type")]
    pub kind: ClassificationKind,

    /// Acoustic fingerprint as a decimal string
    #[serde(rename = "audioprint", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

impl ClassificationEvent {
    pub fn unknown(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ClassificationKind::Unknown,
            fingerprint: None,
            metadata: None,
        }
    }

    pub fn track(
        path: impl Into<String>,
        duplicate: bool,
        fingerprint: i64,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            path: path.into(),
            kind: if duplicate {
                ClassificationKind::Duplicate
            } else {
                ClassificationKind::New
            },
            fingerprint: Some(fingerprint.to_string()),
            metadata: Some(metadata),
        }
    }
}

/// Broadcast channel for classification events
///
/// Subscribers that fall behind by more than `capacity` events lose the
/// oldest ones (`RecvError::Lagged`).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClassificationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ClassificationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// Returns the number of subscribers that received it.
    pub fn emit_lossy(&self, event: ClassificationEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_event_wire_format() {
        let event = ClassificationEvent::track(
            "/in/a.flac",
            false,
            -42,
            EventMetadata {
                album: Some("X".to_string()),
                title: None,
                artist: Some("Y".to_string()),
                year: Some(1999),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["path"], "/in/a.flac");
        assert_eq!(json["type"], "new");
        assert_eq!(json["audioprint"], "-42");
        assert_eq!(json["metadata"]["album"], "X");
        assert!(json["metadata"]["title"].is_null());
        assert_eq!(json["metadata"]["year"], 1999);
    }

    #[test]
    fn test_unknown_event_omits_fingerprint() {
        let json = serde_json::to_value(ClassificationEvent::unknown("/in/cover.jpg")).unwrap();
        assert_eq!(json["type"], "unknown");
        assert!(json.get("audioprint").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_duplicate_kind_not_canonical() {
        assert!(ClassificationKind::New.is_canonical());
        assert!(ClassificationKind::Unknown.is_canonical());
        assert!(!ClassificationKind::Duplicate.is_canonical());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_lossy() {
        let bus = EventBus::new(4);
        assert_eq!(bus.emit_lossy(ClassificationEvent::unknown("/x")), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.emit_lossy(ClassificationEvent::unknown("/y")), 1);
        assert_eq!(rx.recv().await.unwrap().path, "/y");
    }
}
