//! SQLite-backed fingerprint cache database.
//!
//! One database file holds every persisted table: the three fingerprint
//! caches and the scan-result snapshot (see [`crate::results`]). The
//! connection sits behind a mutex, so all writes are serialised through a
//! single writer.

use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::entry::{PerceptualHashCacheEntry, SignatureCacheEntry, SimilarityGroupCacheEntry};

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 2;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signature_cache (
    path          BLOB PRIMARY KEY NOT NULL,
    modified_secs INTEGER NOT NULL,
    size          INTEGER NOT NULL,
    signature     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS phash_cache (
    path          BLOB PRIMARY KEY NOT NULL,
    modified_secs INTEGER NOT NULL,
    size          INTEGER NOT NULL,
    phash         TEXT NOT NULL,
    histogram     TEXT
);

CREATE TABLE IF NOT EXISTS similarity_groups (
    cluster_key TEXT NOT NULL,
    member_path BLOB NOT NULL,
    PRIMARY KEY (cluster_key, member_path)
);
CREATE INDEX IF NOT EXISTS idx_similarity_groups_member ON similarity_groups (member_path);

CREATE TABLE IF NOT EXISTS scan_meta (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    timestamp_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_groups (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    position      INTEGER NOT NULL,
    kind          TEXT NOT NULL,
    group_key     TEXT NOT NULL,
    size_per_file INTEGER
);

CREATE TABLE IF NOT EXISTS scan_group_members (
    group_id      INTEGER NOT NULL REFERENCES scan_groups (id) ON DELETE CASCADE,
    position      INTEGER NOT NULL,
    path          BLOB NOT NULL,
    size          INTEGER NOT NULL,
    modified_secs INTEGER NOT NULL,
    is_video      INTEGER NOT NULL,
    display_name  TEXT NOT NULL,
    PRIMARY KEY (group_id, position)
);

CREATE TABLE IF NOT EXISTS scan_unscannable (
    path BLOB PRIMARY KEY NOT NULL
);
"#;

const DROP_ALL: &str = r#"
DROP TABLE IF EXISTS signature_cache;
DROP TABLE IF EXISTS phash_cache;
DROP TABLE IF EXISTS similarity_groups;
DROP TABLE IF EXISTS scan_meta;
DROP TABLE IF EXISTS scan_group_members;
DROP TABLE IF EXISTS scan_groups;
DROP TABLE IF EXISTS scan_unscannable;
"#;

/// Errors raised by the cache database.
///
/// Any of these is fatal for the scan that hit it.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// SQLite reported an error.
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The cache directory could not be created.
    #[error("Failed to prepare cache location {path}: {source}")]
    Io {
        /// Directory that could not be created
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the connection.
    #[error("Cache connection lock poisoned")]
    Poisoned,

    /// A stored histogram could not be encoded or decoded.
    #[error("Cache value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Uniform contract of every keyed cache table.
pub trait CacheTable {
    /// Key type used for deletion.
    type Key;
    /// Row type.
    type Entry;

    /// Read every row.
    fn read_all(&self) -> CacheResult<Vec<Self::Entry>>;

    /// Insert or replace rows keyed by identity. Returns rows written.
    fn upsert(&self, entries: &[Self::Entry]) -> CacheResult<usize>;

    /// Delete rows by key. Returns rows removed.
    fn delete(&self, keys: &[Self::Key]) -> CacheResult<usize>;
}

/// Persistent store for fingerprints and scan snapshots.
pub struct CacheDb {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDb")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CacheDb {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the parent directory cannot be created or the file is not a
    /// SQLite database.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let db = Self::init(conn, Some(path.to_path_buf()))?;
        log::debug!("Opened cache database at {}", path.display());
        Ok(db)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> CacheResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            log::warn!(
                "Cache schema version {} is not {}, rebuilding cache",
                version,
                SCHEMA_VERSION
            );
            conn.execute_batch(DROP_ALL)?;
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Location of the database file, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> CacheResult<T>,
    ) -> CacheResult<T> {
        let mut conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&mut conn)
    }

    /// Exact-content signature cache.
    #[must_use]
    pub fn signatures(&self) -> SignatureStore<'_> {
        SignatureStore { db: self }
    }

    /// Perceptual hash cache.
    #[must_use]
    pub fn perceptual_hashes(&self) -> PerceptualHashStore<'_> {
        PerceptualHashStore { db: self }
    }

    /// Similarity cluster membership cache.
    #[must_use]
    pub fn similarity_groups(&self) -> SimilarityGroupStore<'_> {
        SimilarityGroupStore { db: self }
    }

    /// Remove every fingerprint, cluster and snapshot row.
    pub fn clear(&self) -> CacheResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM signature_cache;
                 DELETE FROM phash_cache;
                 DELETE FROM similarity_groups;
                 DELETE FROM scan_group_members;
                 DELETE FROM scan_groups;
                 DELETE FROM scan_unscannable;
                 DELETE FROM scan_meta;",
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Close the connection, surfacing any error SQLite reports.
    pub fn close(self) -> CacheResult<()> {
        let conn = self.conn.into_inner().map_err(|_| CacheError::Poisoned)?;
        conn.close().map_err(|(_, e)| CacheError::Database(e))
    }
}

/// Stored form of a path: its raw bytes, so distinct non-UTF-8 names never
/// share a key.
#[cfg(unix)]
pub(crate) fn path_key(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

/// Stored form of a path. Names that are not valid Unicode are stored lossily
/// on this platform.
#[cfg(not(unix))]
pub(crate) fn path_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Inverse of [`path_key`].
#[cfg(unix)]
pub(crate) fn path_from_key(key: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(key))
}

#[cfg(not(unix))]
pub(crate) fn path_from_key(key: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&key).into_owned())
}

/// Handle on the `signature_cache` table.
pub struct SignatureStore<'a> {
    db: &'a CacheDb,
}

impl CacheTable for SignatureStore<'_> {
    type Key = PathBuf;
    type Entry = SignatureCacheEntry;

    fn read_all(&self) -> CacheResult<Vec<SignatureCacheEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT path, modified_secs, size, signature FROM signature_cache")?;
            let rows = stmt.query_map([], |row| {
                Ok(SignatureCacheEntry {
                    path: path_from_key(row.get(0)?),
                    modified_secs: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    signature: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn upsert(&self, entries: &[SignatureCacheEntry]) -> CacheResult<usize> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO signature_cache (path, modified_secs, size, signature)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for entry in entries {
                    stmt.execute(params![
                        path_key(&entry.path),
                        entry.modified_secs,
                        entry.size as i64,
                        entry.signature,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
    }

    fn delete(&self, keys: &[PathBuf]) -> CacheResult<usize> {
        delete_by_path(self.db, "signature_cache", keys)
    }
}

/// Handle on the `phash_cache` table.
pub struct PerceptualHashStore<'a> {
    db: &'a CacheDb,
}

impl CacheTable for PerceptualHashStore<'_> {
    type Key = PathBuf;
    type Entry = PerceptualHashCacheEntry;

    fn read_all(&self) -> CacheResult<Vec<PerceptualHashCacheEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT path, modified_secs, size, phash, histogram FROM phash_cache")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    path_from_key(row.get(0)?),
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (path, modified_secs, size, phash, histogram) = row?;
                // An unreadable histogram only loses the secondary descriptor.
                let histogram = histogram.and_then(|json| match serde_json::from_str(&json) {
                    Ok(h) => Some(h),
                    Err(e) => {
                        log::debug!(
                            "Dropping malformed cached histogram for {}: {}",
                            path.display(),
                            e
                        );
                        None
                    }
                });
                entries.push(PerceptualHashCacheEntry {
                    path,
                    modified_secs,
                    size: size as u64,
                    phash,
                    histogram,
                });
            }
            Ok(entries)
        })
    }

    fn upsert(&self, entries: &[PerceptualHashCacheEntry]) -> CacheResult<usize> {
        let encoded = entries
            .iter()
            .map(|e| e.histogram.as_ref().map(serde_json::to_string).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO phash_cache (path, modified_secs, size, phash, histogram)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (entry, histogram) in entries.iter().zip(&encoded) {
                    stmt.execute(params![
                        path_key(&entry.path),
                        entry.modified_secs,
                        entry.size as i64,
                        entry.phash,
                        histogram,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
    }

    fn delete(&self, keys: &[PathBuf]) -> CacheResult<usize> {
        delete_by_path(self.db, "phash_cache", keys)
    }
}

/// Handle on the `similarity_groups` table.
pub struct SimilarityGroupStore<'a> {
    db: &'a CacheDb,
}

impl SimilarityGroupStore<'_> {
    /// Stored clusters as `cluster_key -> members`, members sorted by path.
    pub fn clusters(&self) -> CacheResult<BTreeMap<String, Vec<PathBuf>>> {
        let mut clusters: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for entry in self.read_all()? {
            clusters.entry(entry.cluster_key).or_default().push(entry.member);
        }
        Ok(clusters)
    }

    /// Drop every cluster that contains any of `members`, in full.
    ///
    /// Returns the keys of the dropped clusters.
    pub fn delete_clusters_containing(&self, members: &[PathBuf]) -> CacheResult<Vec<String>> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut keys = BTreeSet::new();
            {
                let mut find = tx.prepare(
                    "SELECT DISTINCT cluster_key FROM similarity_groups WHERE member_path = ?1",
                )?;
                for member in members {
                    let rows = find.query_map([path_key(member)], |row| row.get::<_, String>(0))?;
                    for key in rows {
                        keys.insert(key?);
                    }
                }
                let mut drop = tx.prepare("DELETE FROM similarity_groups WHERE cluster_key = ?1")?;
                for key in &keys {
                    drop.execute([key])?;
                }
            }
            tx.commit()?;
            Ok(keys.into_iter().collect())
        })
    }
}

impl CacheTable for SimilarityGroupStore<'_> {
    type Key = String;
    type Entry = SimilarityGroupCacheEntry;

    fn read_all(&self) -> CacheResult<Vec<SimilarityGroupCacheEntry>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT cluster_key, member_path FROM similarity_groups
                 ORDER BY cluster_key, member_path",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SimilarityGroupCacheEntry {
                    cluster_key: row.get(0)?,
                    member: path_from_key(row.get(1)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn upsert(&self, entries: &[SimilarityGroupCacheEntry]) -> CacheResult<usize> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO similarity_groups (cluster_key, member_path)
                     VALUES (?1, ?2)",
                )?;
                for entry in entries {
                    stmt.execute(params![entry.cluster_key, path_key(&entry.member)])?;
                }
            }
            tx.commit()?;
            Ok(entries.len())
        })
    }

    fn delete(&self, keys: &[String]) -> CacheResult<usize> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM similarity_groups WHERE cluster_key = ?1")?;
                for key in keys {
                    removed += stmt.execute([key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }
}

fn delete_by_path(db: &CacheDb, table: &str, keys: &[PathBuf]) -> CacheResult<usize> {
    if keys.is_empty() {
        return Ok(0);
    }
    db.with_conn(|conn| {
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {table} WHERE path = ?1"))?;
            for key in keys {
                removed += stmt.execute([path_key(key)])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    })
}
