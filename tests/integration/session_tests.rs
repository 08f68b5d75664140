use mediadupe::cache::CacheDb;
use mediadupe::config::ScanConfig;
use mediadupe::error::ScanError;
use mediadupe::media::{FsMediaSource, MediaItem};
use mediadupe::progress::ProgressCallback;
use mediadupe::repository::{ScanMode, ScanReport, ScanRepository};
use mediadupe::session::{ScanSession, ScanState};
use mediadupe::signal::CancellationToken;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

/// Cancels the scan once the first chunk of files has been processed.
struct CancelOnFirstChunk(CancellationToken);

impl ProgressCallback for CancelOnFirstChunk {
    fn on_phase_start(&self, _phase: &str, _total: usize) {}

    fn on_progress(&self, processed: usize) {
        if processed > 0 {
            self.0.cancel();
        }
    }

    fn on_phase_end(&self, _phase: &str) {}
}

fn repository(chunk_size: usize) -> Arc<ScanRepository> {
    let config = ScanConfig {
        chunk_size,
        ..ScanConfig::default()
    };
    Arc::new(ScanRepository::new(
        Arc::new(CacheDb::open_in_memory().unwrap()),
        Arc::new(FsMediaSource),
        config,
    ))
}

fn videos(dir: &Path, count: usize) -> Vec<MediaItem> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("clip{i}.mp4"));
            fs::write(&path, b"same clip").unwrap();
            MediaItem::from_path(&path).unwrap()
        })
        .collect()
}

#[test]
fn test_background_scan_completes() {
    let dir = tempdir().unwrap();
    let session = Arc::new(ScanSession::new());
    let repo = repository(32);

    let handle = Arc::clone(&session)
        .spawn(Arc::clone(&repo), videos(dir.path(), 3), ScanMode::Exact, None)
        .unwrap();
    let report = handle.join().unwrap();

    assert!(matches!(report, ScanReport::Complete { .. }));
    assert_eq!(report.groups().len(), 1);
    assert_eq!(session.state(), ScanState::Complete);
    assert!(repo.has_valid_cached_results().unwrap());
}

#[test]
fn test_cancel_mid_scan_reports_partial_groups() {
    let dir = tempdir().unwrap();
    let session = Arc::new(ScanSession::new());
    let repo = repository(2);
    let progress: Arc<dyn ProgressCallback> =
        Arc::new(CancelOnFirstChunk(session.cancellation_token()));

    let report = session
        .run(&repo, &videos(dir.path(), 6), ScanMode::All, Some(progress))
        .unwrap();

    let ScanReport::Cancelled { groups, stats, .. } = &report else {
        panic!("expected a cancelled scan, got {:?}", report);
    };
    // Only the first chunk of two files was processed.
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert!(stats.exact.as_ref().unwrap().interrupted);
    assert!(stats.similarity.is_none());
    assert_eq!(session.state(), ScanState::Cancelled);
    assert!(repo.db().scan_results().load().unwrap().is_none());
}

#[test]
fn test_second_scan_needs_acknowledge() {
    let session = ScanSession::new();
    let repo = repository(32);

    session.run(&repo, &[], ScanMode::Exact, None).unwrap();
    let second = session.run(&repo, &[], ScanMode::Exact, None);
    assert!(matches!(second, Err(ScanError::AlreadyRunning)));

    assert!(session.acknowledge());
    assert!(session.run(&repo, &[], ScanMode::Exact, None).is_ok());
}
