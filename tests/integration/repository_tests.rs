use filetime::{set_file_mtime, FileTime};
use mediadupe::cache::{CacheDb, CacheTable};
use mediadupe::config::ScanConfig;
use mediadupe::media::{FsMediaSource, MediaItem};
use mediadupe::repository::{ScanMode, ScanReport, ScanRepository};
use mediadupe::signal::CancellationToken;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn repository(dir: &TempDir) -> ScanRepository {
    let db = CacheDb::open(&dir.path().join("cache.db")).unwrap();
    ScanRepository::new(Arc::new(db), Arc::new(FsMediaSource), ScanConfig::default())
}

fn write_video(dir: &Path, name: &str, content: &[u8], mtime_secs: i64) -> MediaItem {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    MediaItem::from_path(&path).unwrap()
}

fn save_grid(dir: &Path, name: &str, flips: u32) -> MediaItem {
    let img = image::GrayImage::from_fn(9, 8, |x, y| {
        if x == 8 && y < flips {
            image::Luma([0])
        } else {
            image::Luma([20 + x as u8 * 20])
        }
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    MediaItem::from_path(&path).unwrap()
}

fn complete(report: ScanReport) -> mediadupe::results::ScanResults {
    match report {
        ScanReport::Complete { results, .. } => results,
        other => panic!("expected a complete scan, got {:?}", other),
    }
}

#[test]
fn test_all_mode_reports_exact_then_similar() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 2_000),
        save_grid(media.path(), "x.png", 0),
        save_grid(media.path(), "y.png", 2),
    ];
    let repo = repository(&cache);

    let results = complete(repo.run_scan(&items, ScanMode::All, None, &CancellationToken::new()));

    assert_eq!(results.groups.len(), 2);
    assert!(!results.groups[0].is_similar());
    assert!(results.groups[1].is_similar());
    assert!(results.unscannable.is_empty());
}

#[test]
fn test_deleting_a_member_invalidates_two_member_group() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 2_000),
    ];
    let repo = repository(&cache);
    complete(repo.run_scan(&items, ScanMode::Exact, None, &CancellationToken::new()));
    assert!(repo.has_valid_cached_results().unwrap());

    fs::remove_file(&items[1].path).unwrap();

    assert!(!repo.has_valid_cached_results().unwrap());
    assert!(repo.load_validated().unwrap().is_none());
}

#[test]
fn test_modified_member_is_dropped_on_load() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 1_000),
        write_video(media.path(), "c.mp4", b"clip", 1_000),
    ];
    let repo = repository(&cache);
    complete(repo.run_scan(&items, ScanMode::Exact, None, &CancellationToken::new()));

    set_file_mtime(&items[0].path, FileTime::from_unix_time(7_000, 0)).unwrap();

    let loaded = repo.load_validated().unwrap().unwrap();
    assert_eq!(loaded.groups.len(), 1);
    assert_eq!(loaded.groups[0].len(), 2);
    assert!(loaded.groups[0]
        .files()
        .iter()
        .all(|f| f.path != items[0].path));
}

#[test]
fn test_subsecond_mtime_change_keeps_snapshot_valid() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 1_000),
    ];
    let repo = repository(&cache);
    complete(repo.run_scan(&items, ScanMode::Exact, None, &CancellationToken::new()));

    set_file_mtime(&items[0].path, FileTime::from_unix_time(1_000, 500_000_000)).unwrap();

    assert!(repo.has_valid_cached_results().unwrap());
}

#[test]
fn test_rescan_after_reopen_hits_every_cache() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 1_000),
        save_grid(media.path(), "x.png", 0),
        save_grid(media.path(), "y.png", 1),
    ];

    let first = repository(&cache).run_scan(&items, ScanMode::All, None, &CancellationToken::new());
    let ScanReport::Complete { stats: first_stats, .. } = first else {
        panic!("expected a complete scan");
    };

    let repo = repository(&cache);
    let ScanReport::Complete { results, stats } =
        repo.run_scan(&items, ScanMode::All, None, &CancellationToken::new())
    else {
        panic!("expected a complete scan");
    };

    // Equal-size PNGs also take part in exact matching.
    assert!(first_stats.cache_misses() >= 4);
    assert_eq!(stats.cache_misses(), 0);
    assert_eq!(stats.cache_hits(), first_stats.cache_misses());
    assert_eq!(stats.similarity.as_ref().unwrap().reused_clusters, 1);
    assert_eq!(results.groups.len(), 2);
}

#[test]
fn test_on_files_deleted_clears_every_cache() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        save_grid(media.path(), "x.png", 0),
        save_grid(media.path(), "y.png", 1),
        save_grid(media.path(), "z.png", 2),
    ];
    let repo = repository(&cache);
    let before = complete(repo.run_scan(&items, ScanMode::Similar, None, &CancellationToken::new()));
    assert_eq!(before.groups[0].len(), 3);

    fs::remove_file(&items[2].path).unwrap();
    repo.on_files_deleted(&[items[2].path.clone()]).unwrap();

    let db = repo.db();
    assert_eq!(db.perceptual_hashes().read_all().unwrap().len(), 2);
    assert!(db.similarity_groups().clusters().unwrap().is_empty());

    let after = repo.load_validated().unwrap().unwrap();
    assert_eq!(after.timestamp, before.timestamp);
    assert_eq!(after.groups[0].len(), 2);
}

#[test]
fn test_cancelled_scan_keeps_previous_snapshot() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 1_000),
    ];
    let repo = repository(&cache);
    let saved = complete(repo.run_scan(&items, ScanMode::Exact, None, &CancellationToken::new()));

    let token = CancellationToken::new();
    token.cancel();
    let report = repo.run_scan(&items, ScanMode::All, None, &token);

    assert!(matches!(report, ScanReport::Cancelled { .. }));
    let loaded = repo.load_validated().unwrap().unwrap();
    assert_eq!(loaded.timestamp, saved.timestamp);
}

#[test]
fn test_clear_all_forgets_results() {
    let media = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let items = vec![
        write_video(media.path(), "a.mp4", b"clip", 1_000),
        write_video(media.path(), "b.mp4", b"clip", 1_000),
    ];
    let repo = repository(&cache);
    complete(repo.run_scan(&items, ScanMode::Exact, None, &CancellationToken::new()));

    repo.clear_all().unwrap();

    assert!(repo.load_validated().unwrap().is_none());
    assert!(repo.db().signatures().read_all().unwrap().is_empty());
}
