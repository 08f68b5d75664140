use filetime::{set_file_mtime, FileTime};
use mediadupe::cache::{CacheDb, CacheTable};
use mediadupe::duplicates::{ExactConfig, ExactDuplicateEngine, ScanResultGroup};
use mediadupe::media::{FsMediaSource, MediaItem};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_video(dir: &Path, name: &str, content: &[u8], mtime_secs: i64) -> MediaItem {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    MediaItem::from_path(&path).unwrap()
}

#[test]
fn test_three_identical_files_one_group_oldest_first() {
    let dir = tempdir().unwrap();
    let items = vec![
        write_video(dir.path(), "newest.mp4", b"identical clip", 3_000),
        write_video(dir.path(), "oldest.mp4", b"identical clip", 1_000),
        write_video(dir.path(), "middle.mp4", b"identical clip", 2_000),
        write_video(dir.path(), "other.mp4", b"different clip", 1_500),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default())
        .run(&items)
        .unwrap();

    assert_eq!(outcome.groups.len(), 1);
    let names: Vec<&str> = outcome.groups[0]
        .files()
        .iter()
        .map(|f| f.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["oldest.mp4", "middle.mp4", "newest.mp4"]);
    assert!(matches!(outcome.groups[0], ScanResultGroup::Exact(_)));
    assert_eq!(outcome.groups[0].wasted_space(), 2 * 14);
}

#[test]
fn test_rescan_is_served_from_cache() {
    let dir = tempdir().unwrap();
    let items = vec![
        write_video(dir.path(), "a.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "b.mp4", b"same bytes", 1_001),
    ];
    let db = CacheDb::open_in_memory().unwrap();
    let engine = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default());

    let first = engine.run(&items).unwrap();
    let second = engine.run(&items).unwrap();

    assert_eq!(first.stats.cache_misses, 2);
    assert_eq!(second.stats.cache_hits, 2);
    assert_eq!(second.stats.cache_misses, 0);
    assert_eq!(first.groups, second.groups);
}

#[test]
fn test_modified_file_invalidates_only_its_entry() {
    let dir = tempdir().unwrap();
    let mut items = vec![
        write_video(dir.path(), "a.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "b.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "c.mp4", b"same bytes", 1_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();
    let engine = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default());
    engine.run(&items).unwrap();

    // Same size, new content, new second.
    items[2] = write_video(dir.path(), "c.mp4", b"diff bytes", 5_000);
    let outcome = engine.run(&items).unwrap();

    assert_eq!(outcome.stats.cache_hits, 2);
    assert_eq!(outcome.stats.cache_misses, 1);
    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].len(), 2);
}

#[test]
fn test_vanished_files_are_pruned_from_cache() {
    let dir = tempdir().unwrap();
    let items = vec![
        write_video(dir.path(), "a.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "b.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "c.mp4", b"same bytes", 1_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();
    let engine = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default());
    engine.run(&items).unwrap();
    assert_eq!(db.signatures().read_all().unwrap().len(), 3);

    let outcome = engine.run(&items[..2]).unwrap();

    assert_eq!(outcome.stats.pruned_entries, 1);
    assert_eq!(db.signatures().read_all().unwrap().len(), 2);
}

#[test]
fn test_unreadable_file_is_unscannable_not_fatal() {
    let dir = tempdir().unwrap();
    let items = vec![
        write_video(dir.path(), "a.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "b.mp4", b"same bytes", 1_000),
        write_video(dir.path(), "gone.mp4", b"same bytes", 1_000),
    ];
    fs::remove_file(dir.path().join("gone.mp4")).unwrap();
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default())
        .run(&items)
        .unwrap();

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].len(), 2);
    assert_eq!(outcome.unscannable, vec![dir.path().join("gone.mp4")]);
    assert_eq!(outcome.stats.failed_files, 1);
}

#[test]
fn test_identical_images_match_on_pixels() {
    let dir = tempdir().unwrap();
    let img = image::RgbImage::from_fn(16, 16, |x, y| image::Rgb([x as u8 * 10, y as u8 * 10, 50]));
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    img.save(&a).unwrap();
    fs::copy(&a, &b).unwrap();
    let items = vec![
        MediaItem::from_path(&a).unwrap(),
        MediaItem::from_path(&b).unwrap(),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default())
        .run(&items)
        .unwrap();

    assert_eq!(outcome.groups.len(), 1);
    assert!(outcome.groups[0].key().starts_with("image:"));
}

#[test]
fn test_identical_jpegs_are_grouped() {
    let dir = tempdir().unwrap();
    let img = image::RgbImage::from_fn(32, 24, |x, y| image::Rgb([x as u8 * 8, y as u8 * 10, 90]));
    let a = dir.path().join("holiday.jpg");
    let b = dir.path().join("holiday copy.JPEG");
    img.save(&a).unwrap();
    fs::copy(&a, &b).unwrap();
    let items = vec![
        MediaItem::from_path(&a).unwrap(),
        MediaItem::from_path(&b).unwrap(),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = ExactDuplicateEngine::new(&db, &FsMediaSource, ExactConfig::default())
        .run(&items)
        .unwrap();

    assert!(outcome.unscannable.is_empty());
    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.groups[0].len(), 2);
    assert!(outcome.groups[0].key().starts_with("image:"));
}
