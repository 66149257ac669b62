//! Service modules for the dedup worker
//!
//! - `dedup_engine`: per-file classification and record writes
//! - `job_queue`: durable queue and the consumer loop
//! - `view_reconciler`: symlink view maintenance
//! - `notifier`: outbound webhooks
//! - `file_classifier`, `fingerprinter`, `metadata_extractor`: the audio stack

pub mod dedup_engine;
pub mod file_classifier;
pub mod fingerprinter;
pub mod job_queue;
pub mod metadata_extractor;
pub mod notifier;
pub mod view_reconciler;

pub use dedup_engine::{DedupEngine, ScanReport};
pub use file_classifier::{AudioClassifier, AudioProbe, SymphoniaClassifier};
pub use fingerprinter::{FingerprintError, Fingerprinter};
pub use job_queue::{run_worker, JobQueue, WorkerOptions};
pub use metadata_extractor::{MetadataError, MetadataExtractor, TrackTags};
pub use notifier::{Notifier, NotifyError};
pub use view_reconciler::{LinkOutcome, ReconcileReport, ViewLayout, ViewLock, ViewReconciler};
