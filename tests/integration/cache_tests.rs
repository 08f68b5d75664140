use mediadupe::cache::{
    CacheDb, CacheTable, PerceptualHashCacheEntry, SignatureCacheEntry, SimilarityGroupCacheEntry,
};
use mediadupe::media::{from_unix_secs, MediaItem};
use mediadupe::scanner::PerceptualHash;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn item(path: &str) -> MediaItem {
    MediaItem::new(PathBuf::from(path), 42, from_unix_secs(1_000), false)
}

fn signature(n: u8) -> String {
    format!("image:{}", format!("{:02x}", n).repeat(32))
}

#[test]
fn test_cache_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("cache.db");

    {
        let db = CacheDb::open(&db_path).unwrap();
        db.signatures()
            .upsert(&[SignatureCacheEntry::new(&item("/a.png"), signature(1))])
            .unwrap();
        db.perceptual_hashes()
            .upsert(&[PerceptualHashCacheEntry::new(
                &item("/a.png"),
                PerceptualHash::from_hex("00000000000000ff").unwrap(),
                Some(vec![0.5, 0.5]),
            )])
            .unwrap();
        db.close().unwrap();
    }

    let db = CacheDb::open(&db_path).unwrap();
    let signatures = db.signatures().read_all().unwrap();
    assert_eq!(signatures.len(), 1);
    assert!(signatures[0].is_valid_for(&item("/a.png")));

    let hashes = db.perceptual_hashes().read_all().unwrap();
    assert_eq!(hashes[0].histogram, Some(vec![0.5, 0.5]));
    assert_eq!(db.path(), Some(db_path.as_path()));
}

#[test]
fn test_not_a_database_is_an_error() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.db");
    fs::write(&db_path, vec![0xAB; 4096]).unwrap();

    assert!(CacheDb::open(&db_path).is_err());
}

#[test]
fn test_upsert_overwrites_by_path() {
    let db = CacheDb::open_in_memory().unwrap();
    let store = db.signatures();
    store
        .upsert(&[SignatureCacheEntry::new(&item("/a.png"), signature(1))])
        .unwrap();
    store
        .upsert(&[SignatureCacheEntry::new(&item("/a.png"), signature(2))])
        .unwrap();

    let all = store.read_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].signature, signature(2));
}

#[test]
fn test_delete_clusters_containing_drops_whole_cluster() {
    let db = CacheDb::open_in_memory().unwrap();
    let store = db.similarity_groups();
    let entry = |key: &str, member: &str| SimilarityGroupCacheEntry {
        cluster_key: key.to_string(),
        member: PathBuf::from(member),
    };
    store
        .upsert(&[
            entry("k1", "/a.png"),
            entry("k1", "/b.png"),
            entry("k2", "/c.png"),
            entry("k2", "/d.png"),
        ])
        .unwrap();

    let dropped = store
        .delete_clusters_containing(&[PathBuf::from("/b.png")])
        .unwrap();

    assert_eq!(dropped, vec!["k1".to_string()]);
    let clusters = store.clusters().unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(
        clusters["k2"],
        vec![PathBuf::from("/c.png"), PathBuf::from("/d.png")]
    );
}

#[test]
fn test_clear_empties_every_table() {
    let db = CacheDb::open_in_memory().unwrap();
    db.signatures()
        .upsert(&[SignatureCacheEntry::new(&item("/a.png"), signature(1))])
        .unwrap();
    db.similarity_groups()
        .upsert(&[SimilarityGroupCacheEntry {
            cluster_key: "k".to_string(),
            member: PathBuf::from("/a.png"),
        }])
        .unwrap();
    db.scan_results()
        .save(&[], &[PathBuf::from("/x.png")], chrono::Utc::now())
        .unwrap();

    db.clear().unwrap();

    assert!(db.signatures().read_all().unwrap().is_empty());
    assert!(db.similarity_groups().clusters().unwrap().is_empty());
    assert!(db.scan_results().load().unwrap().is_none());
}
