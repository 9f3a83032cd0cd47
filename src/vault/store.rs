//! High-level vault operations used by the access facade.
//!
//! `VaultStore` wraps the record store and the sealing layer so the
//! rest of the application can work with whole `Secret` values.  Every
//! mutation takes the on-disk `vault.lock` and checks the disk-space
//! guard before touching `vault.db`.

use chrono::Utc;

use crate::crypto::keys::DataKey;
use crate::errors::{Result, SecretCtlError};
use crate::vault::db::RecordStore;
use crate::vault::io::{ensure_free_space, VaultLayout, VaultLock, VAULT_WRITE_RESERVE};
use crate::vault::record::{open_key_name, open_metadata, open_record, seal_record};
use crate::vault::secret::{
    index_hash, validate_secret, Secret, SecretMetadata, SecretSummary,
};

/// Conflict behavior for `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Fail with `KeyExists` when the key is already present.
    Create,
    /// Insert or overwrite; `created_at` of an existing record survives.
    Upsert,
}

/// The record-level store for one vault directory.
pub struct VaultStore {
    layout: VaultLayout,
    db: RecordStore,
}

impl VaultStore {
    /// Open the store.  A missing `vault.db` is the valid empty state as
    /// long as the vault itself is initialized.
    pub fn open(layout: VaultLayout) -> Result<Self> {
        if !layout.is_initialized() {
            return Err(SecretCtlError::VaultMissing(layout.dir().to_path_buf()));
        }
        let db = RecordStore::open(&layout.db_path())?;
        Ok(Self { layout, db })
    }

    /// Add or update a secret.
    pub fn set(&self, dek: &DataKey, mut secret: Secret, mode: SetMode) -> Result<()> {
        let now = Utc::now();
        let hash = index_hash(&secret.key);

        let _lock = VaultLock::acquire(&self.layout.lock_path())?;
        ensure_free_space(self.layout.dir(), VAULT_WRITE_RESERVE)?;

        match self.db.get(&hash)? {
            Some(existing) => {
                if mode == SetMode::Create {
                    return Err(SecretCtlError::KeyExists(secret.key));
                }
                // Preserve the original creation time across overwrites.
                let prior = open_metadata(dek, &existing)?;
                secret.meta.created_at = prior.created_at;
                secret.meta.updated_at = now;
            }
            None => {
                secret.meta.created_at = now;
                secret.meta.updated_at = now;
            }
        }

        validate_secret(&secret, now)?;
        let blob = seal_record(dek, &secret)?;
        self.db.put(&hash, &blob)
    }

    /// Decrypt and return a whole secret.
    pub fn get(&self, dek: &DataKey, key: &str) -> Result<Secret> {
        let blob = self
            .db
            .get(&index_hash(key))?
            .ok_or_else(|| SecretCtlError::KeyNotFound(key.to_string()))?;
        open_record(dek, &blob)
    }

    /// Metadata without the value section, or `None` if the key is absent.
    pub fn metadata(&self, dek: &DataKey, key: &str) -> Result<Option<SecretMetadata>> {
        match self.db.get(&index_hash(key))? {
            Some(blob) => Ok(Some(open_metadata(dek, &blob)?)),
            None => Ok(None),
        }
    }

    /// Remove a secret.
    pub fn delete(&self, key: &str) -> Result<()> {
        let _lock = VaultLock::acquire(&self.layout.lock_path())?;
        if !self.db.delete(&index_hash(key))? {
            return Err(SecretCtlError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// List summaries for every secret, sorted by key.
    ///
    /// Tag filtering happens on the clear columns before any blob is
    /// opened; only the key and metadata sections of survivors are
    /// decrypted.
    pub fn list(&self, dek: &DataKey, tag_filter: Option<&str>) -> Result<Vec<SecretSummary>> {
        let mut out = Vec::new();
        for (_, blob) in self.db.iter_records()? {
            if let Some(tag) = tag_filter {
                if !blob.tags.iter().any(|t| t == tag) {
                    continue;
                }
            }
            let key = open_key_name(dek, &blob)?;
            let meta = open_metadata(dek, &blob)?;
            out.push(SecretSummary {
                key,
                tags: blob.tags.clone(),
                expires_at: blob.expires_at,
                has_notes: meta.notes.is_some(),
                has_url: meta.url.is_some(),
                updated_at: meta.updated_at,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    /// Metadata-only presence check on the clear index.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.db.get(&index_hash(key))?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::secret::{Field, SecretShape};
    use tempfile::TempDir;

    fn dek() -> DataKey {
        DataKey::new([6u8; 32])
    }

    fn store() -> (TempDir, VaultStore) {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        std::fs::write(layout.salt_path(), [0u8; 16]).unwrap();
        let store = VaultStore::open(layout).unwrap();
        (dir, store)
    }

    fn single(key: &str, value: &[u8]) -> Secret {
        let now = Utc::now();
        Secret {
            key: key.into(),
            shape: SecretShape::Single {
                value: value.to_vec(),
            },
            meta: SecretMetadata {
                created_at: now,
                updated_at: now,
                ..Default::default()
            },
        }
    }

    #[test]
    fn set_get_roundtrip() {
        let (_dir, store) = store();
        store
            .set(&dek(), single("API_KEY", b"sk-abc123xyz789"), SetMode::Create)
            .unwrap();

        let got = store.get(&dek(), "API_KEY").unwrap();
        assert_eq!(got.key, "API_KEY");
        assert_eq!(got.single_value().unwrap(), b"sk-abc123xyz789");
    }

    #[test]
    fn create_conflicts_upsert_overwrites() {
        let (_dir, store) = store();
        store
            .set(&dek(), single("TOKEN", b"one"), SetMode::Create)
            .unwrap();

        assert!(matches!(
            store.set(&dek(), single("TOKEN", b"two"), SetMode::Create),
            Err(SecretCtlError::KeyExists(_))
        ));

        store
            .set(&dek(), single("TOKEN", b"two"), SetMode::Upsert)
            .unwrap();
        assert_eq!(store.get(&dek(), "TOKEN").unwrap().single_value().unwrap(), b"two");
    }

    #[test]
    fn upsert_preserves_created_at() {
        let (_dir, store) = store();
        store
            .set(&dek(), single("TOKEN", b"one"), SetMode::Create)
            .unwrap();
        let created = store.get(&dek(), "TOKEN").unwrap().meta.created_at;

        store
            .set(&dek(), single("TOKEN", b"two"), SetMode::Upsert)
            .unwrap();
        let after = store.get(&dek(), "TOKEN").unwrap().meta;
        assert_eq!(after.created_at, created);
        assert!(after.updated_at >= created);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.delete("ghost"),
            Err(SecretCtlError::KeyNotFound(_))
        ));
    }

    #[test]
    fn list_filters_on_clear_tags() {
        let (_dir, store) = store();
        let mut a = single("alpha", b"1");
        a.meta.tags = vec!["prod".into()];
        let mut b = single("beta", b"2");
        b.meta.tags = vec!["dev".into()];
        store.set(&dek(), a, SetMode::Create).unwrap();
        store.set(&dek(), b, SetMode::Create).unwrap();

        let all = store.list(&dek(), None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "alpha");

        let prod = store.list(&dek(), Some("prod")).unwrap();
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].key, "alpha");
    }

    #[test]
    fn multi_field_roundtrip() {
        let (_dir, store) = store();
        let now = Utc::now();
        let secret = Secret {
            key: "database/production".into(),
            shape: SecretShape::Multi {
                fields: vec![
                    Field {
                        name: "host".into(),
                        value: b"db.example.com".to_vec(),
                        sensitive: false,
                        hint: None,
                        kind: None,
                    },
                    Field {
                        name: "password".into(),
                        value: b"p@ss".to_vec(),
                        sensitive: true,
                        hint: None,
                        kind: None,
                    },
                ],
            },
            meta: SecretMetadata {
                created_at: now,
                updated_at: now,
                ..Default::default()
            },
        };
        store.set(&dek(), secret, SetMode::Create).unwrap();

        let got = store.get(&dek(), "database/production").unwrap();
        let host = got.field("host").unwrap();
        assert!(!host.sensitive);
        assert_eq!(host.value, b"db.example.com");
        assert!(got.field("password").unwrap().sensitive);
    }

    #[test]
    fn wrong_dek_cannot_read() {
        let (_dir, store) = store();
        store
            .set(&dek(), single("KEY", b"value"), SetMode::Create)
            .unwrap();

        let other = DataKey::new([7u8; 32]);
        assert!(store.get(&other, "KEY").is_err());
    }
}
