//! Dedup engine integration tests against real WAV files
//!
//! Exercises the full audio stack: infer sniffing, lofty probing, symphonia
//! decoding and resampling to the canonical rate.

mod helpers;

use audedup_common::db::{self, tracks, unknown_files};
use audedup_common::events::{ClassificationKind, EventBus};
use audedup_worker::{DedupEngine, SymphoniaClassifier, ViewLayout, ViewReconciler};
use helpers::{create_test_db, write_melody_wav, write_text_file, AudioConfig};
use std::path::Path;
use std::sync::Arc;

fn engine(pool: &sqlx::SqlitePool) -> DedupEngine {
    DedupEngine::new(pool.clone(), Arc::new(SymphoniaClassifier::new()), EventBus::new(64))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[tokio::test]
async fn test_same_recording_at_two_rates_is_duplicate() {
    let (dir, pool) = create_test_db().await.unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();

    let a = write_melody_wav(&input.join("a.wav"), &AudioConfig::at_rate(44100)).unwrap();
    let b = write_melody_wav(&input.join("b.wav"), &AudioConfig::at_rate(48000)).unwrap();

    let report = engine(&pool).process_path(&input).await.unwrap();

    assert_eq!(report.events.len(), 2);
    assert!(report.failed.is_empty(), "failed: {:?}", report.failed);
    assert_eq!(report.events[0].path, path_str(&a));
    assert_eq!(report.events[0].kind, ClassificationKind::New);
    assert_eq!(report.events[1].path, path_str(&b));
    assert_eq!(report.events[1].kind, ClassificationKind::Duplicate);
    assert_eq!(report.events[0].fingerprint, report.events[1].fingerprint);

    let track_a = tracks::find_track_by_path(&pool, path_str(&a)).await.unwrap().unwrap();
    let track_b = tracks::find_track_by_path(&pool, path_str(&b)).await.unwrap().unwrap();
    assert!(!track_a.duplicate);
    assert!(track_b.duplicate);
    assert_eq!(track_a.identity(), track_b.identity());
}

#[tokio::test]
async fn test_different_recording_is_new() {
    let (dir, pool) = create_test_db().await.unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();

    write_melody_wav(&input.join("a.wav"), &AudioConfig::default()).unwrap();
    write_melody_wav(
        &input.join("c.wav"),
        &AudioConfig {
            pattern_offset: 1,
            ..Default::default()
        },
    )
    .unwrap();

    let report = engine(&pool).process_path(&input).await.unwrap();
    let kinds: Vec<_> = report.events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ClassificationKind::New, ClassificationKind::New]);
    assert_ne!(report.events[0].fingerprint, report.events[1].fingerprint);
}

#[tokio::test]
async fn test_unknown_files_and_idempotent_rescan() {
    let (dir, pool) = create_test_db().await.unwrap();
    let input = dir.path().join("in");

    write_text_file(&input.join("notes/readme.txt"), "liner notes").unwrap();
    write_melody_wav(&input.join("a.wav"), &AudioConfig::default()).unwrap();

    let engine = engine(&pool);
    let first = engine.process_path(&input).await.unwrap();
    assert_eq!(first.events.len(), 2);
    assert!(first
        .events
        .iter()
        .any(|e| e.kind == ClassificationKind::Unknown && e.path.ends_with("readme.txt")));

    let mut rx = engine.event_bus().subscribe();
    let second = engine.process_path(&input).await.unwrap();
    assert!(second.events.is_empty());
    assert_eq!(second.skipped, 2);
    assert!(rx.try_recv().is_err());

    assert_eq!(tracks::count_tracks(&pool, None).await.unwrap(), 1);
    assert_eq!(unknown_files::count_unknown_files(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_too_short_audio_left_unrecorded() {
    let (dir, pool) = create_test_db().await.unwrap();
    let input = dir.path().join("in");
    std::fs::create_dir(&input).unwrap();

    let short = write_melody_wav(
        &input.join("jingle.wav"),
        &AudioConfig {
            steps: 4,
            ..Default::default()
        },
    )
    .unwrap();

    let report = engine(&pool).process_path(&input).await.unwrap();
    assert!(report.events.is_empty());
    assert_eq!(report.failed, vec![path_str(&short).to_string()]);
    assert!(!db::is_classified(&pool, path_str(&short)).await.unwrap());
}

#[tokio::test]
async fn test_scan_then_reconcile_links_only_canonical() {
    let (dir, pool) = create_test_db().await.unwrap();
    let source = dir.path().join("store");
    let view = dir.path().join("view");
    std::fs::create_dir(&source).unwrap();

    write_melody_wav(&source.join("a.wav"), &AudioConfig::at_rate(44100)).unwrap();
    write_melody_wav(&source.join("b.wav"), &AudioConfig::at_rate(48000)).unwrap();

    engine(&pool).process_path(&source).await.unwrap();

    let layout = ViewLayout::new(&view, &source, &source).unwrap();
    let report = ViewReconciler::new(pool.clone(), layout)
        .full_reconcile()
        .await
        .unwrap();
    assert_eq!(report.created, 1);

    let entries: Vec<_> = std::fs::read_dir(&view)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(entries, vec!["a.wav".to_string()]);
    assert_eq!(
        std::fs::read_link(view.join("a.wav")).unwrap(),
        Path::new("../store/a.wav")
    );
}
