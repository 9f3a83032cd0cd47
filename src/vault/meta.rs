//! `vault.salt` and `vault.meta` — the unlock material for a vault.
//!
//! `vault.meta` is a JSON document holding the format version, the KDF
//! parameters used at creation, the AEAD-wrapped data-encryption key,
//! and the persisted unlock-failure counters that drive the progressive
//! cooldown.  The wrap binds the salt and KDF parameters as associated
//! data, so swapping either invalidates the wrapped DEK.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::aead;
use crate::crypto::kdf::{KdfParams, SALT_LEN};
use crate::crypto::keys::{DataKey, MasterKey};
use crate::errors::{Result, SecretCtlError};
use crate::vault::io::{atomic_write, VaultLayout};

/// Current vault format version.
pub const VAULT_VERSION: u32 = 1;

/// Metadata document stored at `vault.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultMeta {
    /// Vault format version.
    pub version: u32,

    /// Argon2id parameters used to derive the master key.
    pub kdf: KdfParams,

    /// The DEK, AEAD-wrapped under the master key (base64 of
    /// nonce || ciphertext || tag).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub wrapped_dek: Vec<u8>,

    /// Consecutive failed unlock attempts since the last success.
    #[serde(default)]
    pub unlock_failures: u32,

    /// When the most recent failed unlock happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_unlock: Option<DateTime<Utc>>,
}

impl VaultMeta {
    /// Wrap `dek` under `master` and build a fresh metadata document.
    pub fn create(
        master: &MasterKey,
        dek: &DataKey,
        salt: &[u8; SALT_LEN],
        kdf: KdfParams,
    ) -> Result<Self> {
        let wrapped_dek = aead::seal(master.as_bytes(), dek.as_bytes(), &wrap_aad(salt, &kdf))?;
        Ok(Self {
            version: VAULT_VERSION,
            kdf,
            wrapped_dek,
            unlock_failures: 0,
            last_failed_unlock: None,
        })
    }

    /// Attempt to unwrap the DEK.  A wrong master key, tampered blob, or
    /// mismatched salt/params all fail identically.
    pub fn unwrap_dek(&self, master: &MasterKey, salt: &[u8; SALT_LEN]) -> Result<DataKey> {
        let plain = aead::open(
            master.as_bytes(),
            &self.wrapped_dek,
            &wrap_aad(salt, &self.kdf),
        )
        .map_err(|_| SecretCtlError::AuthenticationFailed)?;

        let bytes: [u8; 32] = plain
            .as_slice()
            .try_into()
            .map_err(|_| SecretCtlError::AuthenticationFailed)?;
        Ok(DataKey::new(bytes))
    }

    /// Remaining cooldown before another unlock attempt is accepted.
    ///
    /// Progressive backoff: 5 consecutive failures cost 30 s, 10 cost
    /// 5 min, 20 cost 30 min.  `None` means no cooldown is active.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let window = cooldown_window(self.unlock_failures)?;
        let last = self.last_failed_unlock?;
        let elapsed = (now - last).to_std().ok()?;
        window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Record one more failed unlock.
    pub fn note_failure(&mut self, now: DateTime<Utc>) {
        self.unlock_failures = self.unlock_failures.saturating_add(1);
        self.last_failed_unlock = Some(now);
    }

    /// Reset the failure counters after a successful unlock.
    /// Returns true if anything changed and the meta needs persisting.
    pub fn note_success(&mut self) -> bool {
        let dirty = self.unlock_failures != 0 || self.last_failed_unlock.is_some();
        self.unlock_failures = 0;
        self.last_failed_unlock = None;
        dirty
    }

    /// Load `vault.meta`, rejecting unknown versions.
    pub fn load(layout: &VaultLayout) -> Result<Self> {
        let path = layout.meta_path();
        let bytes =
            std::fs::read(&path).map_err(|e| SecretCtlError::io("reading vault.meta", e))?;
        let meta: Self = serde_json::from_slice(&bytes)
            .map_err(|e| SecretCtlError::Serialization(format!("vault.meta: {e}")))?;
        if meta.version > VAULT_VERSION {
            return Err(SecretCtlError::UnsupportedVersion {
                found: meta.version,
                supported: VAULT_VERSION,
            });
        }
        Ok(meta)
    }

    /// Persist this document atomically.
    pub fn save(&self, layout: &VaultLayout) -> Result<()> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| SecretCtlError::Serialization(format!("vault.meta: {e}")))?;
        atomic_write(&layout.meta_path(), &bytes)
    }
}

/// Read the 16-byte vault salt.  A missing salt is fatal for reads.
pub fn load_salt(layout: &VaultLayout) -> Result<[u8; SALT_LEN]> {
    let path = layout.salt_path();
    if !path.exists() {
        return Err(SecretCtlError::VaultMissing(layout.dir().to_path_buf()));
    }
    let bytes = std::fs::read(&path).map_err(|e| SecretCtlError::io("reading vault.salt", e))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| SecretCtlError::IntegrityFailure("vault.salt has the wrong length".into()))
}

/// Persist the raw salt atomically.
pub fn save_salt(layout: &VaultLayout, salt: &[u8; SALT_LEN]) -> Result<()> {
    atomic_write(&layout.salt_path(), salt)
}

/// Associated data binding the wrapped DEK to this vault's salt and KDF
/// parameters.
fn wrap_aad(salt: &[u8; SALT_LEN], kdf: &KdfParams) -> Vec<u8> {
    let mut aad = Vec::with_capacity(SALT_LEN + 24);
    aad.extend_from_slice(salt);
    aad.extend_from_slice(&kdf.memory_kib.to_be_bytes());
    aad.extend_from_slice(&kdf.iterations.to_be_bytes());
    aad.extend_from_slice(&kdf.parallelism.to_be_bytes());
    aad
}

fn cooldown_window(failures: u32) -> Option<Duration> {
    match failures {
        0..=4 => None,
        5..=9 => Some(Duration::from_secs(30)),
        10..=19 => Some(Duration::from_secs(5 * 60)),
        _ => Some(Duration::from_secs(30 * 60)),
    }
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn master_for(password: &[u8], salt: &[u8; SALT_LEN]) -> MasterKey {
        MasterKey::new(kdf::derive_master_key(password, salt, &fast_params()).unwrap())
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let salt = [3u8; SALT_LEN];
        let master = master_for(b"password", &salt);
        let dek = DataKey::generate().unwrap();

        let meta = VaultMeta::create(&master, &dek, &salt, fast_params()).unwrap();
        let unwrapped = meta.unwrap_dek(&master, &salt).unwrap();
        assert_eq!(unwrapped.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn wrong_password_fails_like_tampering() {
        let salt = [3u8; SALT_LEN];
        let master = master_for(b"password", &salt);
        let dek = DataKey::generate().unwrap();
        let meta = VaultMeta::create(&master, &dek, &salt, fast_params()).unwrap();

        let wrong = master_for(b"other-password", &salt);
        assert!(matches!(
            meta.unwrap_dek(&wrong, &salt),
            Err(SecretCtlError::AuthenticationFailed)
        ));

        let mut tampered = meta.clone();
        let last = tampered.wrapped_dek.len() - 1;
        tampered.wrapped_dek[last] ^= 1;
        assert!(matches!(
            tampered.unwrap_dek(&master, &salt),
            Err(SecretCtlError::AuthenticationFailed)
        ));
    }

    #[test]
    fn swapped_salt_invalidates_wrap() {
        let salt = [3u8; SALT_LEN];
        let master = master_for(b"password", &salt);
        let dek = DataKey::generate().unwrap();
        let meta = VaultMeta::create(&master, &dek, &salt, fast_params()).unwrap();

        let other_salt = [4u8; SALT_LEN];
        assert!(meta.unwrap_dek(&master, &other_salt).is_err());
    }

    #[test]
    fn cooldown_thresholds() {
        let now = Utc::now();
        let mut meta = VaultMeta {
            version: VAULT_VERSION,
            kdf: fast_params(),
            wrapped_dek: vec![],
            unlock_failures: 0,
            last_failed_unlock: None,
        };

        assert!(meta.cooldown_remaining(now).is_none());

        for _ in 0..4 {
            meta.note_failure(now);
        }
        assert!(meta.cooldown_remaining(now).is_none());

        meta.note_failure(now);
        let remaining = meta.cooldown_remaining(now).unwrap();
        assert!(remaining <= Duration::from_secs(30));

        for _ in 0..5 {
            meta.note_failure(now);
        }
        assert_eq!(meta.unlock_failures, 10);
        let remaining = meta.cooldown_remaining(now).unwrap();
        assert!(remaining > Duration::from_secs(30));
        assert!(remaining <= Duration::from_secs(5 * 60));

        for _ in 0..10 {
            meta.note_failure(now);
        }
        let remaining = meta.cooldown_remaining(now).unwrap();
        assert!(remaining > Duration::from_secs(5 * 60));
        assert!(remaining <= Duration::from_secs(30 * 60));
    }

    #[test]
    fn cooldown_expires_with_time() {
        let mut meta = VaultMeta {
            version: VAULT_VERSION,
            kdf: fast_params(),
            wrapped_dek: vec![],
            unlock_failures: 0,
            last_failed_unlock: None,
        };
        let past = Utc::now() - chrono::Duration::seconds(60);
        for _ in 0..5 {
            meta.note_failure(past);
        }
        assert!(meta.cooldown_remaining(Utc::now()).is_none());
    }

    #[test]
    fn success_resets_counters() {
        let mut meta = VaultMeta {
            version: VAULT_VERSION,
            kdf: fast_params(),
            wrapped_dek: vec![],
            unlock_failures: 7,
            last_failed_unlock: Some(Utc::now()),
        };
        assert!(meta.note_success());
        assert_eq!(meta.unlock_failures, 0);
        assert!(!meta.note_success());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());

        let salt = [9u8; SALT_LEN];
        let master = master_for(b"password", &salt);
        let dek = DataKey::generate().unwrap();
        let meta = VaultMeta::create(&master, &dek, &salt, fast_params()).unwrap();

        meta.save(&layout).unwrap();
        save_salt(&layout, &salt).unwrap();

        let loaded = VaultMeta::load(&layout).unwrap();
        assert_eq!(loaded.version, VAULT_VERSION);
        assert_eq!(loaded.wrapped_dek, meta.wrapped_dek);
        assert_eq!(load_salt(&layout).unwrap(), salt);
    }

    #[test]
    fn rejects_future_version() {
        let dir = tempfile::TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path());
        std::fs::write(
            layout.meta_path(),
            serde_json::json!({
                "version": 99,
                "kdf": {"memory_kib": 65536, "iterations": 3, "parallelism": 4},
                "wrapped_dek": ""
            })
            .to_string(),
        )
        .unwrap();

        assert!(matches!(
            VaultMeta::load(&layout),
            Err(SecretCtlError::UnsupportedVersion { found: 99, .. })
        ));
    }
}
