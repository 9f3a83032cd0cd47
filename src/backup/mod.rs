//! Encrypted backup and restore.
//!
//! A backup is a single file:
//!
//! ```text
//! offset  length  content
//! 0       8       magic "SCTL_BKP"
//! 8       4       header length L (big-endian)
//! 12      L       header JSON
//! 12+L    4       ciphertext length C (big-endian)
//! 16+L    C       AES-256-GCM nonce(12) || ct || tag(16) of the payload
//! 16+L+C  32      outer HMAC-SHA256 over bytes [0 .. 16+L+C)
//! ```
//!
//! The outer HMAC is authenticated before any decryption proceeds.  In
//! `master` mode a *fresh* backup salt is generated per backup (the
//! vault salt is never reused) and the encryption and MAC keys are
//! HKDF-expanded from the Argon2id-derived backup master key.  In `key`
//! mode a 32-byte random key file provides the encryption key directly.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::aead;
use crate::crypto::kdf::{self, KdfParams, SALT_LEN};
use crate::crypto::keys::{
    hkdf_expand, hmac_sha256, rand_bytes, verify_hmac_sha256, BACKUP_ENC_INFO, BACKUP_MAC_INFO,
};
use crate::errors::{Result, SecretCtlError};
use crate::vault::db::RecordStore;
use crate::vault::io::{atomic_write, fsync_dir, VaultLayout};
use crate::vault::meta::VaultMeta;

/// Magic bytes at the start of every backup file.
pub const MAGIC: &[u8; 8] = b"SCTL_BKP";

/// Current backup format version; greater versions are rejected.
pub const BACKUP_VERSION: u32 = 1;

const HMAC_LEN: usize = 32;
const KEY_FILE_LEN: usize = 32;

/// How the backup payload is keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Password-derived via Argon2id over a fresh backup salt.
    Master,
    /// Raw 32-byte key file.
    Key,
}

/// Plaintext header describing one backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHeader {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub vault_version: u32,
    pub encryption_mode: EncryptionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,
    /// Fresh per-backup salt, present in `master` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_salt: Option<String>,
    pub includes_audit: bool,
    pub secret_count: u64,
    pub checksum_algorithm: String,
}

/// The encrypted payload: full copies of the vault files.
#[derive(Serialize, Deserialize)]
struct BackupPayload {
    vault_salt: String,
    vault_meta: String,
    vault_db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audit: Option<String>,
}

/// Key material for backup and restore.
pub enum BackupKeySource<'a> {
    /// Master-password mode: Argon2id over a fresh backup salt.
    Password(&'a [u8]),
    /// Key-file mode: the 32 raw bytes of the key file.
    KeyFile(&'a [u8]),
}

/// Conflict behavior when the restore target already holds a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    Error,
    Skip,
    Overwrite,
}

/// How far a restore proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// Authenticate the file and report header fields only.
    VerifyOnly,
    /// Decrypt and report what would happen; the target is untouched.
    DryRun,
    /// Restore for real.
    Apply,
}

/// What a restore (in any mode) found and did.
#[derive(Debug)]
pub struct RestoreReport {
    pub header: BackupHeader,
    /// True when the target already held a vault.
    pub conflict: bool,
    /// Secrets that were (or would be) materialized.
    pub restored_secrets: u64,
    /// True when files were actually written.
    pub applied: bool,
}

/// Create an encrypted backup of the vault at `layout` into `out_path`.
///
/// `kdf_params` governs the backup key derivation in `master` mode and
/// is independent of the vault's own parameters.
pub fn create_backup(
    layout: &VaultLayout,
    out_path: &Path,
    key_source: &BackupKeySource<'_>,
    include_audit: bool,
    kdf_params: KdfParams,
) -> Result<BackupHeader> {
    if !layout.is_initialized() {
        return Err(SecretCtlError::VaultMissing(layout.dir().to_path_buf()));
    }

    // The real vault version comes from vault.meta; an unreadable meta
    // fails the backup instead of silently writing a default.
    let vault_meta = VaultMeta::load(layout)
        .map_err(|e| SecretCtlError::IntegrityFailure(format!("cannot read vault.meta: {e}")))?;

    let salt_bytes = fs::read(layout.salt_path())
        .map_err(|e| SecretCtlError::io("reading vault.salt for backup", e))?;
    let meta_bytes = fs::read(layout.meta_path())
        .map_err(|e| SecretCtlError::io("reading vault.meta for backup", e))?;
    let db_bytes = if layout.db_path().exists() {
        fs::read(layout.db_path()).map_err(|e| SecretCtlError::io("reading vault.db for backup", e))?
    } else {
        Vec::new()
    };
    let audit_bytes = if include_audit && layout.audit_path().exists() {
        Some(
            fs::read(layout.audit_path())
                .map_err(|e| SecretCtlError::io("reading audit.jsonl for backup", e))?,
        )
    } else {
        None
    };

    let secret_count = if layout.db_path().exists() {
        RecordStore::open(&layout.db_path())?.count()?
    } else {
        0
    };

    // Key schedule.
    let (enc_key, mac_key, backup_salt, header_kdf) = match key_source {
        BackupKeySource::Password(password) => {
            let salt = kdf::generate_salt()?;
            let mut master = kdf::derive_master_key(password, &salt, &kdf_params)?;
            let enc = hkdf_expand(&master, BACKUP_ENC_INFO)?;
            let mac = hkdf_expand(&master, BACKUP_MAC_INFO)?;
            master.zeroize();
            (enc, mac, Some(salt), Some(kdf_params))
        }
        BackupKeySource::KeyFile(raw) => {
            let enc: [u8; 32] = (*raw).try_into().map_err(|_| {
                SecretCtlError::validation("key file", format!("must be {KEY_FILE_LEN} bytes"))
            })?;
            let mac = hkdf_expand(&enc, BACKUP_MAC_INFO)?;
            (enc, mac, None, None)
        }
    };

    let header = BackupHeader {
        version: BACKUP_VERSION,
        created_at: Utc::now(),
        vault_version: vault_meta.version,
        encryption_mode: match key_source {
            BackupKeySource::Password(_) => EncryptionMode::Master,
            BackupKeySource::KeyFile(_) => EncryptionMode::Key,
        },
        kdf_params: header_kdf,
        backup_salt: backup_salt.map(|s| BASE64.encode(s)),
        includes_audit: audit_bytes.is_some(),
        secret_count,
        checksum_algorithm: "sha256".into(),
    };

    let payload = BackupPayload {
        vault_salt: BASE64.encode(&salt_bytes),
        vault_meta: BASE64.encode(&meta_bytes),
        vault_db: BASE64.encode(&db_bytes),
        audit: audit_bytes.map(|b| BASE64.encode(b)),
    };
    let mut payload_bytes = serde_json::to_vec(&payload)
        .map_err(|e| SecretCtlError::Serialization(format!("backup payload: {e}")))?;

    let ciphertext = aead::seal(&enc_key, &payload_bytes, &[])?;
    payload_bytes.zeroize();

    // Header bytes are written exactly as hashed.
    let header_bytes = serde_json::to_vec(&header)
        .map_err(|e| SecretCtlError::Serialization(format!("backup header: {e}")))?;

    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| SecretCtlError::Serialization("backup header exceeds u32::MAX".into()))?;
    let ct_len = u32::try_from(ciphertext.len())
        .map_err(|_| SecretCtlError::Serialization("backup payload exceeds u32::MAX".into()))?;

    let mut file = Vec::with_capacity(16 + header_bytes.len() + ciphertext.len() + HMAC_LEN);
    file.extend_from_slice(MAGIC);
    file.extend_from_slice(&header_len.to_be_bytes());
    file.extend_from_slice(&header_bytes);
    file.extend_from_slice(&ct_len.to_be_bytes());
    file.extend_from_slice(&ciphertext);

    let tag = hmac_sha256(&mac_key, &file)?;
    file.extend_from_slice(&tag);

    atomic_write(out_path, &file)?;
    Ok(header)
}

/// Parsed-but-unverified sections of a backup file.
struct RawBackup {
    header: BackupHeader,
    ciphertext: Vec<u8>,
    /// Everything the outer HMAC covers.
    hmac_scope: Vec<u8>,
    stored_hmac: Vec<u8>,
}

fn read_backup(path: &Path) -> Result<RawBackup> {
    let data = fs::read(path).map_err(|e| SecretCtlError::io("reading the backup file", e))?;

    let min = MAGIC.len() + 4 + 4 + HMAC_LEN;
    if data.len() < min {
        return Err(SecretCtlError::IntegrityFailure(
            "file too small to be a backup".into(),
        ));
    }
    if &data[0..8] != MAGIC {
        return Err(SecretCtlError::IntegrityFailure(
            "missing SCTL_BKP magic bytes".into(),
        ));
    }

    let header_len = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes")) as usize;
    let header_end = 12 + header_len;
    if header_end + 4 + HMAC_LEN > data.len() {
        return Err(SecretCtlError::IntegrityFailure(
            "header length exceeds file size".into(),
        ));
    }

    let header_bytes = &data[12..header_end];
    let header: BackupHeader = serde_json::from_slice(header_bytes)
        .map_err(|e| SecretCtlError::IntegrityFailure(format!("backup header: {e}")))?;
    if header.version > BACKUP_VERSION {
        return Err(SecretCtlError::UnsupportedVersion {
            found: header.version,
            supported: BACKUP_VERSION,
        });
    }

    let ct_len =
        u32::from_be_bytes(data[header_end..header_end + 4].try_into().expect("4 bytes")) as usize;
    let ct_start = header_end + 4;
    let ct_end = ct_start + ct_len;
    if ct_end + HMAC_LEN != data.len() {
        return Err(SecretCtlError::IntegrityFailure(
            "ciphertext length does not match file size".into(),
        ));
    }

    Ok(RawBackup {
        header,
        ciphertext: data[ct_start..ct_end].to_vec(),
        hmac_scope: data[..ct_end].to_vec(),
        stored_hmac: data[ct_end..].to_vec(),
    })
}

/// Derive the enc/mac keys for an existing backup from its header.
fn restore_keys(
    header: &BackupHeader,
    key_source: &BackupKeySource<'_>,
) -> Result<([u8; 32], [u8; 32])> {
    match (header.encryption_mode, key_source) {
        (EncryptionMode::Master, BackupKeySource::Password(password)) => {
            let salt_b64 = header.backup_salt.as_ref().ok_or_else(|| {
                SecretCtlError::IntegrityFailure("master-mode backup without a salt".into())
            })?;
            let salt_vec = BASE64
                .decode(salt_b64)
                .map_err(|_| SecretCtlError::IntegrityFailure("backup salt is not base64".into()))?;
            let salt: [u8; SALT_LEN] = salt_vec.as_slice().try_into().map_err(|_| {
                SecretCtlError::IntegrityFailure("backup salt has the wrong length".into())
            })?;
            let params = header.kdf_params.unwrap_or_default();
            let mut master = kdf::derive_master_key(password, &salt, &params)?;
            let enc = hkdf_expand(&master, BACKUP_ENC_INFO)?;
            let mac = hkdf_expand(&master, BACKUP_MAC_INFO)?;
            master.zeroize();
            Ok((enc, mac))
        }
        (EncryptionMode::Key, BackupKeySource::KeyFile(raw)) => {
            let enc: [u8; 32] = (*raw).try_into().map_err(|_| {
                SecretCtlError::validation("key file", format!("must be {KEY_FILE_LEN} bytes"))
            })?;
            let mac = hkdf_expand(&enc, BACKUP_MAC_INFO)?;
            Ok((enc, mac))
        }
        (EncryptionMode::Master, BackupKeySource::KeyFile(_)) => Err(SecretCtlError::validation(
            "key",
            "this backup needs the master password, not a key file",
        )),
        (EncryptionMode::Key, BackupKeySource::Password(_)) => Err(SecretCtlError::validation(
            "key",
            "this backup needs its key file, not a password",
        )),
    }
}

/// Restore (or inspect) a backup into `target_dir`.
///
/// The outer HMAC is authenticated before anything is decrypted.  A real
/// restore materializes a scratch directory next to the target and swaps
/// it into place with a single rename (recursive copy across devices).
pub fn restore_backup(
    backup_path: &Path,
    target_dir: &Path,
    key_source: &BackupKeySource<'_>,
    mode: RestoreMode,
    on_conflict: OnConflict,
    with_audit: bool,
) -> Result<RestoreReport> {
    let raw = read_backup(backup_path)?;
    let (enc_key, mac_key) = restore_keys(&raw.header, key_source)?;

    verify_hmac_sha256(&mac_key, &raw.hmac_scope, &raw.stored_hmac)
        .map_err(|_| SecretCtlError::IntegrityFailure("backup HMAC verification failed".into()))?;

    let conflict = VaultLayout::new(target_dir).is_initialized();

    if mode == RestoreMode::VerifyOnly {
        return Ok(RestoreReport {
            header: raw.header,
            conflict,
            restored_secrets: 0,
            applied: false,
        });
    }

    let payload_bytes = aead::open(&enc_key, &raw.ciphertext, &[])
        .map_err(|_| SecretCtlError::IntegrityFailure("backup payload failed to decrypt".into()))?;
    let payload: BackupPayload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| SecretCtlError::IntegrityFailure(format!("backup payload: {e}")))?;

    let would_restore = match (conflict, on_conflict) {
        (true, OnConflict::Skip) | (true, OnConflict::Error) => 0,
        _ => raw.header.secret_count,
    };

    if mode == RestoreMode::DryRun {
        return Ok(RestoreReport {
            header: raw.header,
            conflict,
            restored_secrets: would_restore,
            applied: false,
        });
    }

    if conflict {
        match on_conflict {
            OnConflict::Error => {
                return Err(SecretCtlError::VaultExists(target_dir.to_path_buf()))
            }
            OnConflict::Skip => {
                return Ok(RestoreReport {
                    header: raw.header,
                    conflict,
                    restored_secrets: 0,
                    applied: false,
                })
            }
            OnConflict::Overwrite => {}
        }
    }

    // Materialize everything in a scratch directory first.
    let parent = target_dir.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| SecretCtlError::io("creating the target parent", e))?;
    let scratch = scratch_dir_for(target_dir);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)
            .map_err(|e| SecretCtlError::io("clearing a stale scratch directory", e))?;
    }
    fs::create_dir_all(&scratch)
        .map_err(|e| SecretCtlError::io("creating the scratch directory", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&scratch, fs::Permissions::from_mode(0o700))
            .map_err(|e| SecretCtlError::io("restricting the scratch directory", e))?;
    }

    write_decoded(&scratch.join("vault.salt"), &payload.vault_salt)?;
    write_decoded(&scratch.join("vault.meta"), &payload.vault_meta)?;
    write_decoded(&scratch.join("vault.db"), &payload.vault_db)?;
    if with_audit {
        if let Some(audit) = &payload.audit {
            write_decoded(&scratch.join("audit.jsonl"), audit)?;
        }
    } else if conflict {
        // Keep the target's existing audit trail across an overwrite.
        let old_audit = target_dir.join("audit.jsonl");
        if old_audit.exists() {
            fs::copy(&old_audit, scratch.join("audit.jsonl"))
                .map_err(|e| SecretCtlError::io("preserving the audit log", e))?;
        }
    }

    // The old vault goes away only once the scratch tree is complete.
    if conflict {
        fs::remove_dir_all(target_dir)
            .map_err(|e| SecretCtlError::io("removing the existing vault", e))?;
    }

    match fs::rename(&scratch, target_dir) {
        Ok(()) => {}
        Err(_) => {
            // Cross-device fallback: full recursive copy, then cleanup.
            copy_dir_recursive(&scratch, target_dir)?;
            fs::remove_dir_all(&scratch)
                .map_err(|e| SecretCtlError::io("removing the scratch directory", e))?;
        }
    }
    fsync_dir(parent)?;

    Ok(RestoreReport {
        header: raw.header,
        conflict,
        restored_secrets: would_restore,
        applied: true,
    })
}

fn scratch_dir_for(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.restore",
        target.file_name().unwrap_or_default().to_string_lossy()
    ))
}

fn write_decoded(path: &Path, b64: &str) -> Result<()> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|_| SecretCtlError::IntegrityFailure("backup payload is not base64".into()))?;
    atomic_write(path, &bytes)
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| SecretCtlError::io("creating the target directory", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(to, fs::Permissions::from_mode(0o700))
            .map_err(|e| SecretCtlError::io("restricting the target directory", e))?;
    }
    for entry in fs::read_dir(from).map_err(|e| SecretCtlError::io("reading the scratch tree", e))? {
        let entry = entry.map_err(|e| SecretCtlError::io("reading the scratch tree", e))?;
        let dest = to.join(entry.file_name());
        if entry
            .file_type()
            .map_err(|e| SecretCtlError::io("reading the scratch tree", e))?
            .is_dir()
        {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)
                .map_err(|e| SecretCtlError::io("copying a restored file", e))?;
        }
    }
    Ok(())
}

/// Generate a random 32-byte backup key file with 0600 permissions.
pub fn generate_key_file(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        return Err(SecretCtlError::validation(
            "key file",
            format!("already exists at {}", path.display()),
        ));
    }
    let mut key = vec![0u8; KEY_FILE_LEN];
    rand_bytes(&mut key)?;
    atomic_write(path, &key)?;
    Ok(key)
}

/// Load a backup key file, validating its length.
pub fn load_key_file(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).map_err(|e| SecretCtlError::io("reading the key file", e))?;
    if data.len() != KEY_FILE_LEN {
        return Err(SecretCtlError::validation(
            "key file",
            format!("must be exactly {KEY_FILE_LEN} bytes, got {}", data.len()),
        ));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::session;
    use crate::vault::store::{SetMode, VaultStore};
    use crate::vault::secret::{Secret, SecretMetadata, SecretShape};
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn vault_with_secret(dir: &Path) -> VaultLayout {
        let layout = VaultLayout::new(dir);
        let sess = session::init(&layout, b"pw", fast(), Duration::from_secs(900)).unwrap();
        let store = VaultStore::open(layout.clone()).unwrap();
        let now = Utc::now();
        store
            .set(
                sess.dek(),
                Secret {
                    key: "API_KEY".into(),
                    shape: SecretShape::Single {
                        value: b"sk-abc123xyz789".to_vec(),
                    },
                    meta: SecretMetadata {
                        created_at: now,
                        updated_at: now,
                        ..Default::default()
                    },
                },
                SetMode::Create,
            )
            .unwrap();
        layout
    }

    #[test]
    fn backup_file_layout() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");

        let header = create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();
        assert_eq!(header.version, BACKUP_VERSION);
        assert_eq!(header.secret_count, 1);
        assert_eq!(header.checksum_algorithm, "sha256");
        assert!(header.backup_salt.is_some());

        let bytes = fs::read(&out).unwrap();
        assert_eq!(&bytes[0..8], MAGIC);
        let header_len = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let parsed: BackupHeader = serde_json::from_slice(&bytes[12..12 + header_len]).unwrap();
        assert_eq!(parsed.secret_count, 1);
    }

    #[test]
    fn roundtrip_master_mode() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            true,
            fast(),
        )
        .unwrap();

        let target = dir.path().join("restored");
        let report = restore_backup(
            &out,
            &target,
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::Apply,
            OnConflict::Error,
            true,
        )
        .unwrap();
        assert!(report.applied);
        assert!(!report.conflict);

        // The restored vault unlocks with the *vault* password and holds
        // the same secret.
        let restored_layout = VaultLayout::new(&target);
        let sess = session::unlock(&restored_layout, b"pw", Duration::from_secs(900)).unwrap();
        let store = VaultStore::open(restored_layout).unwrap();
        let secret = store.get(sess.dek(), "API_KEY").unwrap();
        assert_eq!(secret.single_value().unwrap(), b"sk-abc123xyz789");
    }

    #[test]
    fn roundtrip_key_mode() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        let key = generate_key_file(&dir.path().join("backup.key")).unwrap();

        let header = create_backup(&layout, &out, &BackupKeySource::KeyFile(&key), false, fast())
            .unwrap();
        assert_eq!(header.encryption_mode, EncryptionMode::Key);
        assert!(header.backup_salt.is_none());
        assert!(header.kdf_params.is_none());

        let target = dir.path().join("restored");
        let report = restore_backup(
            &out,
            &target,
            &BackupKeySource::KeyFile(&key),
            RestoreMode::Apply,
            OnConflict::Error,
            false,
        )
        .unwrap();
        assert!(report.applied);
        assert!(VaultLayout::new(&target).is_initialized());
    }

    #[test]
    fn any_flipped_byte_fails_restore() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        let original = fs::read(&out).unwrap();
        // Sample a byte from each section: magic, header, ciphertext, HMAC.
        for &offset in &[0usize, 20, original.len() / 2, original.len() - 1] {
            let mut tampered = original.clone();
            tampered[offset] ^= 0x01;
            fs::write(&out, &tampered).unwrap();

            let result = restore_backup(
                &out,
                &dir.path().join("restored"),
                &BackupKeySource::Password(b"backup-pw"),
                RestoreMode::Apply,
                OnConflict::Error,
                false,
            );
            assert!(result.is_err(), "flip at {offset} must fail");
        }
    }

    #[test]
    fn wrong_password_fails_before_decrypt() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        let result = restore_backup(
            &out,
            &dir.path().join("restored"),
            &BackupKeySource::Password(b"wrong"),
            RestoreMode::VerifyOnly,
            OnConflict::Error,
            false,
        );
        assert!(matches!(result, Err(SecretCtlError::IntegrityFailure(_))));
    }

    #[test]
    fn verify_only_and_dry_run_touch_nothing() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        let target = dir.path().join("restored");
        for mode in [RestoreMode::VerifyOnly, RestoreMode::DryRun] {
            let report = restore_backup(
                &out,
                &target,
                &BackupKeySource::Password(b"backup-pw"),
                mode,
                OnConflict::Error,
                false,
            )
            .unwrap();
            assert!(!report.applied);
            assert!(!target.exists());
        }
    }

    #[test]
    fn dry_run_reports_counts_under_conflict() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        // Restoring over the source vault itself is a conflict.
        let skip = restore_backup(
            &out,
            layout.dir(),
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::DryRun,
            OnConflict::Skip,
            false,
        )
        .unwrap();
        assert!(skip.conflict);
        assert_eq!(skip.restored_secrets, 0);

        let overwrite = restore_backup(
            &out,
            layout.dir(),
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::DryRun,
            OnConflict::Overwrite,
            false,
        )
        .unwrap();
        assert_eq!(overwrite.restored_secrets, 1);
    }

    #[test]
    fn conflict_error_and_skip_protect_target() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        let err = restore_backup(
            &out,
            layout.dir(),
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::Apply,
            OnConflict::Error,
            false,
        );
        assert!(matches!(err, Err(SecretCtlError::VaultExists(_))));

        let report = restore_backup(
            &out,
            layout.dir(),
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::Apply,
            OnConflict::Skip,
            false,
        )
        .unwrap();
        assert!(!report.applied);
    }

    #[test]
    fn backup_salt_differs_from_vault_salt() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        let header = create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        let vault_salt = fs::read(layout.salt_path()).unwrap();
        let backup_salt = BASE64.decode(header.backup_salt.unwrap()).unwrap();
        assert_ne!(vault_salt, backup_salt);
    }

    #[test]
    fn rejects_future_version() {
        let dir = TempDir::new().unwrap();
        let layout = vault_with_secret(&dir.path().join("vault"));
        let out = dir.path().join("backup.sctl");
        create_backup(
            &layout,
            &out,
            &BackupKeySource::Password(b"backup-pw"),
            false,
            fast(),
        )
        .unwrap();

        // Bump the version inside the header (HMAC does not matter; the
        // version gate fires first).
        let bytes = fs::read(&out).unwrap();
        let header_len = u32::from_be_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let mut header: serde_json::Value =
            serde_json::from_slice(&bytes[12..12 + header_len]).unwrap();
        header["version"] = serde_json::json!(2);
        let new_header = serde_json::to_vec(&header).unwrap();
        let mut rebuilt = Vec::new();
        rebuilt.extend_from_slice(MAGIC);
        rebuilt.extend_from_slice(&(new_header.len() as u32).to_be_bytes());
        rebuilt.extend_from_slice(&new_header);
        rebuilt.extend_from_slice(&bytes[12 + header_len..]);
        fs::write(&out, rebuilt).unwrap();

        let result = restore_backup(
            &out,
            &dir.path().join("restored"),
            &BackupKeySource::Password(b"backup-pw"),
            RestoreMode::VerifyOnly,
            OnConflict::Error,
            false,
        );
        assert!(matches!(
            result,
            Err(SecretCtlError::UnsupportedVersion { found: 2, .. })
        ));
    }
}
