//! Scan result snapshot persistence.
//!
//! The last scan's groups, their members and the unscannable files are
//! stored under one shared timestamp. Saving replaces the previous snapshot
//! inside a single transaction, so readers only ever see one scan's view.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::database::{path_from_key, path_key};
use crate::cache::{CacheDb, CacheResult};
use crate::duplicates::{ExactGroup, ScanResultGroup, SimilarGroup};
use crate::media::{from_unix_secs, MediaItem};

const KIND_EXACT: &str = "exact";
const KIND_SIMILAR: &str = "similar";

/// A persisted scan snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    /// Groups in stored order
    pub groups: Vec<ScanResultGroup>,
    /// Files that could not be scanned
    pub unscannable: Vec<PathBuf>,
    /// When the scan that produced the snapshot finished
    pub timestamp: DateTime<Utc>,
}

impl ScanResults {
    /// Whether the snapshot holds no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total space reclaimable across all groups.
    #[must_use]
    pub fn wasted_space(&self) -> u64 {
        self.groups.iter().map(ScanResultGroup::wasted_space).sum()
    }
}

impl CacheDb {
    /// Scan result snapshot store.
    #[must_use]
    pub fn scan_results(&self) -> ScanResultStore<'_> {
        ScanResultStore { db: self }
    }
}

/// Handle on the snapshot tables.
pub struct ScanResultStore<'a> {
    db: &'a CacheDb,
}

impl ScanResultStore<'_> {
    /// Replace the stored snapshot.
    ///
    /// The timestamp is stored with millisecond precision.
    pub fn save(
        &self,
        groups: &[ScanResultGroup],
        unscannable: &[PathBuf],
        timestamp: DateTime<Utc>,
    ) -> CacheResult<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute_batch(
                "DELETE FROM scan_group_members;
                 DELETE FROM scan_groups;
                 DELETE FROM scan_unscannable;
                 DELETE FROM scan_meta;",
            )?;
            tx.execute(
                "INSERT INTO scan_meta (id, timestamp_ms) VALUES (1, ?1)",
                [timestamp.timestamp_millis()],
            )?;
            {
                let mut insert_group = tx.prepare(
                    "INSERT INTO scan_groups (position, kind, group_key, size_per_file)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut insert_member = tx.prepare(
                    "INSERT INTO scan_group_members
                     (group_id, position, path, size, modified_secs, is_video, display_name)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for (position, group) in groups.iter().enumerate() {
                    let (kind, size_per_file) = match group {
                        ScanResultGroup::Exact(g) => (KIND_EXACT, Some(g.size_per_file as i64)),
                        ScanResultGroup::Similar(_) => (KIND_SIMILAR, None),
                    };
                    let group_id = insert_group.insert(params![
                        position as i64,
                        kind,
                        group.key(),
                        size_per_file
                    ])?;
                    for (member_pos, file) in group.files().iter().enumerate() {
                        insert_member.execute(params![
                            group_id,
                            member_pos as i64,
                            path_key(&file.path),
                            file.size as i64,
                            file.modified_secs(),
                            file.is_video,
                            file.display_name,
                        ])?;
                    }
                }

                let mut insert_unscannable =
                    tx.prepare("INSERT OR IGNORE INTO scan_unscannable (path) VALUES (?1)")?;
                for path in unscannable {
                    insert_unscannable.execute([path_key(path)])?;
                }
            }
            tx.commit()?;
            log::debug!(
                "Saved scan snapshot: {} groups, {} unscannable",
                groups.len(),
                unscannable.len()
            );
            Ok(())
        })
    }

    /// Read the stored snapshot, `None` if nothing was ever saved.
    ///
    /// Groups of an unknown kind are skipped.
    pub fn load(&self) -> CacheResult<Option<ScanResults>> {
        self.db.with_conn(|conn| {
            let timestamp_ms: Option<i64> = conn
                .query_row("SELECT timestamp_ms FROM scan_meta WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(timestamp) =
                timestamp_ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            else {
                return Ok(None);
            };

            let mut group_stmt = conn.prepare(
                "SELECT id, kind, group_key, size_per_file FROM scan_groups ORDER BY position",
            )?;
            let mut member_stmt = conn.prepare(
                "SELECT path, size, modified_secs, is_video, display_name
                 FROM scan_group_members WHERE group_id = ?1 ORDER BY position",
            )?;

            let rows = group_stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?;

            let mut groups = Vec::new();
            for row in rows {
                let (id, kind, key, size_per_file) = row?;
                let files = member_stmt
                    .query_map([id], |row| {
                        let mut item = MediaItem::new(
                            path_from_key(row.get(0)?),
                            row.get::<_, i64>(1)? as u64,
                            from_unix_secs(row.get(2)?),
                            row.get(3)?,
                        );
                        item.display_name = row.get(4)?;
                        Ok(item)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let group = match kind.as_str() {
                    KIND_EXACT => ScanResultGroup::Exact(ExactGroup {
                        signature: key,
                        files,
                        size_per_file: size_per_file.unwrap_or(0) as u64,
                    }),
                    KIND_SIMILAR => ScanResultGroup::Similar(SimilarGroup { phash: key, files }),
                    other => {
                        log::warn!("Skipping stored group of unknown kind {:?}", other);
                        continue;
                    }
                };
                groups.push(group);
            }

            let mut unscannable_stmt =
                conn.prepare("SELECT path FROM scan_unscannable ORDER BY path")?;
            let unscannable = unscannable_stmt
                .query_map([], |row| row.get(0).map(path_from_key))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(ScanResults {
                groups,
                unscannable,
                timestamp,
            }))
        })
    }

    /// Remove the stored snapshot.
    pub fn clear(&self) -> CacheResult<()> {
        self.db.with_conn(|conn| {
            conn.execute_batch(
                "DELETE FROM scan_group_members;
                 DELETE FROM scan_groups;
                 DELETE FROM scan_unscannable;
                 DELETE FROM scan_meta;",
            )?;
            Ok(())
        })
    }
}
