use filetime::{set_file_mtime, FileTime};
use mediadupe::cache::{CacheDb, CacheTable};
use mediadupe::duplicates::{SimilarityConfig, SimilarityEngine};
use mediadupe::media::{FsMediaSource, MediaItem};
use std::path::Path;
use tempfile::tempdir;

/// A 9x8 gradient whose first `flips` rows end in a dark pixel. Each flipped
/// row changes exactly one bit of the difference hash.
fn save_grid(dir: &Path, name: &str, flips: u32, mtime_secs: i64) -> MediaItem {
    let img = image::GrayImage::from_fn(9, 8, |x, y| {
        if x == 8 && y < flips {
            image::Luma([0])
        } else {
            image::Luma([20 + x as u8 * 20])
        }
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    MediaItem::from_path(&path).unwrap()
}

fn engine(db: &CacheDb) -> SimilarityEngine<'_> {
    SimilarityEngine::new(db, &FsMediaSource, SimilarityConfig::default().with_threshold(5))
}

#[test]
fn test_distance_one_clusters_distance_eight_does_not() {
    let dir = tempdir().unwrap();
    let items = vec![
        save_grid(dir.path(), "base.png", 0, 1_000),
        save_grid(dir.path(), "near.png", 1, 2_000),
        save_grid(dir.path(), "far.png", 8, 3_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = engine(&db).run(&items).unwrap();

    assert_eq!(outcome.groups.len(), 1);
    let names: Vec<&str> = outcome.groups[0]
        .files()
        .iter()
        .map(|f| f.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["base.png", "near.png"]);
    assert_eq!(db.similarity_groups().clusters().unwrap().len(), 1);
}

#[test]
fn test_unchanged_rescan_reuses_clusters() {
    let dir = tempdir().unwrap();
    let items = vec![
        save_grid(dir.path(), "a.png", 0, 1_000),
        save_grid(dir.path(), "b.png", 2, 1_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let first = engine(&db).run(&items).unwrap();
    let second = engine(&db).run(&items).unwrap();

    assert_eq!(first.stats.cache_misses, 2);
    assert_eq!(second.stats.cache_hits, 2);
    assert_eq!(second.stats.cache_misses, 0);
    assert_eq!(second.stats.reused_clusters, 1);
    assert_eq!(first.groups, second.groups);
}

#[test]
fn test_changed_member_rebuilds_its_cluster() {
    let dir = tempdir().unwrap();
    let mut items = vec![
        save_grid(dir.path(), "a.png", 0, 1_000),
        save_grid(dir.path(), "b.png", 1, 1_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();
    engine(&db).run(&items).unwrap();

    // b drifts out of range of a.
    items[1] = save_grid(dir.path(), "b.png", 8, 9_000);
    let outcome = engine(&db).run(&items).unwrap();

    assert!(outcome.groups.is_empty());
    assert_eq!(outcome.stats.invalidated_clusters, 1);
    assert_eq!(outcome.stats.cache_hits, 1);
    assert_eq!(outcome.stats.cache_misses, 1);
    assert!(db.similarity_groups().clusters().unwrap().is_empty());
}

#[test]
fn test_undecodable_image_is_unscannable() {
    let dir = tempdir().unwrap();
    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"not an image").unwrap();
    let items = vec![
        save_grid(dir.path(), "a.png", 0, 1_000),
        MediaItem::from_path(&broken).unwrap(),
    ];
    let db = CacheDb::open_in_memory().unwrap();

    let outcome = engine(&db).run(&items).unwrap();

    assert_eq!(outcome.unscannable, vec![broken]);
    assert_eq!(outcome.stats.failed_files, 1);
    assert_eq!(db.perceptual_hashes().read_all().unwrap().len(), 1);
}

/// A 9x8 falling gradient, far from every [`save_grid`] image. The first
/// `flips` rows end in a bright pixel.
fn save_falling(dir: &Path, name: &str, flips: u32, mtime_secs: i64) -> MediaItem {
    let img = image::GrayImage::from_fn(9, 8, |x, y| {
        if x == 8 && y < flips {
            image::Luma([255])
        } else {
            image::Luma([200 - x as u8 * 20])
        }
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
    MediaItem::from_path(&path).unwrap()
}

#[test]
fn test_change_in_one_cluster_keeps_unrelated_cluster() {
    let dir = tempdir().unwrap();
    let mut items = vec![
        save_grid(dir.path(), "rise_a.png", 0, 1_000),
        save_grid(dir.path(), "rise_b.png", 1, 1_000),
        save_falling(dir.path(), "fall_a.png", 0, 1_000),
        save_falling(dir.path(), "fall_b.png", 1, 1_000),
    ];
    let db = CacheDb::open_in_memory().unwrap();
    assert_eq!(engine(&db).run(&items).unwrap().groups.len(), 2);

    items[1] = save_grid(dir.path(), "rise_b.png", 8, 9_000);
    let outcome = engine(&db).run(&items).unwrap();

    assert_eq!(outcome.stats.invalidated_clusters, 1);
    assert_eq!(outcome.stats.reused_clusters, 1);
    assert_eq!(outcome.stats.cache_hits, 3);
    assert_eq!(outcome.groups.len(), 1);
    let names: Vec<&str> = outcome.groups[0]
        .files()
        .iter()
        .map(|f| f.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["fall_a.png", "fall_b.png"]);

    let clusters = db.similarity_groups().clusters().unwrap();
    assert_eq!(clusters.len(), 1);
    assert!(clusters
        .values()
        .all(|members| members.iter().all(|m| m.ends_with("fall_a.png") || m.ends_with("fall_b.png"))));
}
