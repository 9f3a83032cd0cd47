//! `vault.db` — the SQLite record store.
//!
//! One row per secret, keyed by the opaque index hash.  The three sealed
//! sections are BLOBs; tags (JSON array) and expiry are stored in clear
//! so `scan` can filter without the DEK.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{Result, SecretCtlError};
use crate::vault::record::RecordBlob;

/// One clear-side row from `scan`.
#[derive(Debug, Clone)]
pub struct ScanRow {
    pub index_hash: String,
    pub tags: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Handle to the record store.
pub struct RecordStore {
    conn: Connection,
}

impl RecordStore {
    /// Open (or create) the record store at `path`.
    ///
    /// A missing `vault.db` next to an existing `vault.salt` is a valid
    /// empty vault, so creation here is silent.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SecretCtlError::io("opening vault.db", into_io(e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                index_hash TEXT PRIMARY KEY,
                key_blob   BLOB NOT NULL,
                value_blob BLOB NOT NULL,
                meta_blob  BLOB NOT NULL,
                tags       TEXT NOT NULL,
                expires_at TEXT
            );",
        )
        .map_err(db_err)?;

        Ok(Self { conn })
    }

    /// Insert or replace the record stored under `index_hash`.
    pub fn put(&self, index_hash: &str, blob: &RecordBlob) -> Result<()> {
        let tags = serde_json::to_string(&blob.tags)
            .map_err(|e| SecretCtlError::Serialization(format!("tags: {e}")))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO records
                 (index_hash, key_blob, value_blob, meta_blob, tags, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    index_hash,
                    blob.key_blob,
                    blob.value_blob,
                    blob.meta_blob,
                    tags,
                    blob.expires_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Fetch the record stored under `index_hash`.
    pub fn get(&self, index_hash: &str) -> Result<Option<RecordBlob>> {
        self.conn
            .query_row(
                "SELECT key_blob, value_blob, meta_blob, tags, expires_at
                 FROM records WHERE index_hash = ?1",
                params![index_hash],
                |row| {
                    Ok(RecordBlob {
                        key_blob: row.get(0)?,
                        value_blob: row.get(1)?,
                        meta_blob: row.get(2)?,
                        tags: parse_tags(&row.get::<_, String>(3)?),
                        expires_at: parse_expiry(row.get::<_, Option<String>>(4)?),
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    /// Remove a record.  Returns true if something was deleted.
    pub fn delete(&self, index_hash: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM records WHERE index_hash = ?1", params![index_hash])
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Clear-side iteration: index hash, tags, and expiry of every record.
    pub fn scan(&self) -> Result<Vec<ScanRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT index_hash, tags, expires_at FROM records")
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ScanRow {
                    index_hash: row.get(0)?,
                    tags: parse_tags(&row.get::<_, String>(1)?),
                    expires_at: parse_expiry(row.get::<_, Option<String>>(2)?),
                })
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Full rows, for operations that need the sealed sections too.
    pub fn iter_records(&self) -> Result<Vec<(String, RecordBlob)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT index_hash, key_blob, value_blob, meta_blob, tags, expires_at
                 FROM records",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    RecordBlob {
                        key_blob: row.get(1)?,
                        value_blob: row.get(2)?,
                        meta_blob: row.get(3)?,
                        tags: parse_tags(&row.get::<_, String>(4)?),
                        expires_at: parse_expiry(row.get::<_, Option<String>>(5)?),
                    },
                ))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(db_err)?);
        }
        Ok(out)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(db_err)
    }
}

fn parse_tags(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn parse_expiry(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn db_err(e: rusqlite::Error) -> SecretCtlError {
    SecretCtlError::io("accessing vault.db", into_io(e))
}

fn into_io(e: rusqlite::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blob(tag: &str) -> RecordBlob {
        RecordBlob {
            key_blob: vec![1, 2, 3],
            value_blob: vec![4, 5, 6],
            meta_blob: vec![7, 8, 9],
            tags: vec![tag.to_string()],
            expires_at: None,
        }
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(&dir.path().join("vault.db")).unwrap();

        store.put("hash-a", &blob("prod")).unwrap();
        let fetched = store.get("hash-a").unwrap().unwrap();
        assert_eq!(fetched.key_blob, vec![1, 2, 3]);
        assert_eq!(fetched.tags, vec!["prod"]);

        assert!(store.delete("hash-a").unwrap());
        assert!(!store.delete("hash-a").unwrap());
        assert!(store.get("hash-a").unwrap().is_none());
    }

    #[test]
    fn put_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(&dir.path().join("vault.db")).unwrap();

        store.put("hash-a", &blob("one")).unwrap();
        store.put("hash-a", &blob("two")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("hash-a").unwrap().unwrap().tags, vec!["two"]);
    }

    #[test]
    fn scan_returns_clear_columns() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(&dir.path().join("vault.db")).unwrap();

        let mut b = blob("prod");
        b.expires_at = Some(Utc::now() + chrono::Duration::days(30));
        store.put("hash-a", &b).unwrap();
        store.put("hash-b", &blob("dev")).unwrap();

        let rows = store.scan().unwrap();
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.index_hash == "hash-a").unwrap();
        assert!(a.expires_at.is_some());
        assert_eq!(a.tags, vec!["prod"]);
    }

    #[cfg(unix)]
    #[test]
    fn db_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.db");
        let _store = RecordStore::open(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
