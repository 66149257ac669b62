//! audedup-worker library interface
//!
//! Exposes the dedup engine, job queue, view reconciler and notifier for the
//! binary and for integration tests.

pub mod ffi;
pub mod services;
pub mod utils;

pub use services::{
    run_worker, AudioClassifier, DedupEngine, JobQueue, Notifier, ScanReport, SymphoniaClassifier,
    ViewLayout, ViewReconciler, WorkerOptions,
};

/// Events buffered per subscriber before a slow listener starts lagging
pub const EVENT_BUS_CAPACITY: usize = 1024;
