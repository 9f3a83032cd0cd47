//! The key hierarchy and session lifecycle.
//!
//! Three tiers: the master password (never stored), the Argon2id-derived
//! master key (lives only inside an unlocked session), and the random
//! DEK (wrapped under the master key in `vault.meta`).  A session holds
//! the unwrapped DEK plus the HKDF-derived audit key, and an idle
//! deadline that the owner refreshes on every API call.

use std::time::{Duration, Instant};

use chrono::Utc;
use zeroize::Zeroizing;

use crate::crypto::kdf::{self, KdfParams};
use crate::crypto::keys::{DataKey, MasterKey};
use crate::errors::{Result, SecretCtlError};
use crate::vault::io::{ensure_free_space, VaultLayout, VaultLock, VAULT_WRITE_RESERVE};
use crate::vault::meta::{self, VaultMeta};

/// An unlocked vault session.  Dropping it wipes all key material.
pub struct Session {
    master: MasterKey,
    dek: DataKey,
    audit_key: Zeroizing<[u8; 32]>,
    idle_window: Duration,
    idle_deadline: Instant,
}

impl Session {
    fn build(master: MasterKey, dek: DataKey, idle_window: Duration) -> Result<Self> {
        let audit_key = Zeroizing::new(master.audit_key()?);
        Ok(Self {
            master,
            dek,
            audit_key,
            idle_window,
            idle_deadline: Instant::now() + idle_window,
        })
    }

    pub fn dek(&self) -> &DataKey {
        &self.dek
    }

    pub fn master(&self) -> &MasterKey {
        &self.master
    }

    /// The HKDF-derived key that chains the audit log.
    pub fn audit_key(&self) -> &[u8; 32] {
        &self.audit_key
    }

    /// Refresh the idle deadline.  Called on every facade operation.
    pub fn touch(&mut self) {
        self.idle_deadline = Instant::now() + self.idle_window;
    }

    /// True once the idle window has elapsed without a `touch`.
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.idle_deadline
    }
}

/// Create a brand-new vault in `layout` and return an unlocked session.
///
/// Fails with `VaultExists` if `vault.salt` is already present.
pub fn init(
    layout: &VaultLayout,
    password: &[u8],
    kdf_params: KdfParams,
    idle_window: Duration,
) -> Result<Session> {
    if layout.is_initialized() {
        return Err(SecretCtlError::VaultExists(layout.dir().to_path_buf()));
    }

    layout.create_dir()?;
    let _lock = VaultLock::acquire(&layout.lock_path())?;
    ensure_free_space(layout.dir(), VAULT_WRITE_RESERVE)?;

    let salt = kdf::generate_salt()?;
    let master = MasterKey::new(kdf::derive_master_key(password, &salt, &kdf_params)?);
    let dek = DataKey::generate()?;

    let vault_meta = VaultMeta::create(&master, &dek, &salt, kdf_params)?;
    meta::save_salt(layout, &salt)?;
    vault_meta.save(layout)?;
    layout.enforce_permissions()?;

    Session::build(master, dek, idle_window)
}

/// Unlock an existing vault.
///
/// Enforces the persisted cooldown before any KDF work, and treats a
/// wrong password and a tampered wrapped DEK identically.
pub fn unlock(layout: &VaultLayout, password: &[u8], idle_window: Duration) -> Result<Session> {
    let salt = meta::load_salt(layout)?;
    let mut vault_meta = VaultMeta::load(layout)?;

    let now = Utc::now();
    if let Some(remaining) = vault_meta.cooldown_remaining(now) {
        return Err(SecretCtlError::CooldownActive(remaining));
    }

    let master = MasterKey::new(kdf::derive_master_key(password, &salt, &vault_meta.kdf)?);

    match vault_meta.unwrap_dek(&master, &salt) {
        Ok(dek) => {
            if vault_meta.note_success() {
                vault_meta.save(layout)?;
            }
            layout.enforce_permissions()?;
            Session::build(master, dek, idle_window)
        }
        Err(_) => {
            vault_meta.note_failure(now);
            vault_meta.save(layout)?;
            Err(SecretCtlError::AuthenticationFailed)
        }
    }
}

/// Change the master password.
///
/// Unlocks with `old`, generates a fresh salt, re-derives the master
/// key from `new`, and re-wraps the *same* DEK — records on disk are
/// untouched.
pub fn rotate_password(layout: &VaultLayout, old: &[u8], new: &[u8]) -> Result<()> {
    let session = unlock(layout, old, Duration::from_secs(60))?;

    let _lock = VaultLock::acquire(&layout.lock_path())?;
    ensure_free_space(layout.dir(), VAULT_WRITE_RESERVE)?;

    let kdf_params = VaultMeta::load(layout)?.kdf;
    let new_salt = kdf::generate_salt()?;
    let new_master = MasterKey::new(kdf::derive_master_key(new, &new_salt, &kdf_params)?);

    let new_meta = VaultMeta::create(&new_master, session.dek(), &new_salt, kdf_params)?;

    // Both files go through temp+rename; salt first so a crash between
    // the two renames is detected as an unlock failure, never as a
    // silently stale key schedule.
    meta::save_salt(layout, &new_salt)?;
    new_meta.save(layout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        }
    }

    const IDLE: Duration = Duration::from_secs(900);

    #[test]
    fn init_then_unlock() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));

        let created = init(&layout, b"correct horse battery staple", fast(), IDLE).unwrap();
        let reopened = unlock(&layout, b"correct horse battery staple", IDLE).unwrap();
        assert_eq!(created.dek().as_bytes(), reopened.dek().as_bytes());
        assert_eq!(created.audit_key(), reopened.audit_key());
    }

    #[test]
    fn init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));

        init(&layout, b"password", fast(), IDLE).unwrap();
        assert!(matches!(
            init(&layout, b"password", fast(), IDLE),
            Err(SecretCtlError::VaultExists(_))
        ));
    }

    #[test]
    fn unlock_missing_vault_fails() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));
        assert!(matches!(
            unlock(&layout, b"password", IDLE),
            Err(SecretCtlError::VaultMissing(_))
        ));
    }

    #[test]
    fn wrong_password_fails_and_counts() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));
        init(&layout, b"password", fast(), IDLE).unwrap();

        assert!(matches!(
            unlock(&layout, b"wrong", IDLE),
            Err(SecretCtlError::AuthenticationFailed)
        ));
        assert_eq!(VaultMeta::load(&layout).unwrap().unlock_failures, 1);

        unlock(&layout, b"password", IDLE).unwrap();
        assert_eq!(VaultMeta::load(&layout).unwrap().unlock_failures, 0);
    }

    #[test]
    fn fifth_failure_starts_cooldown() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));
        init(&layout, b"password", fast(), IDLE).unwrap();

        for _ in 0..5 {
            let _ = unlock(&layout, b"wrong", IDLE);
        }
        // Even the correct password is refused while cooling down.
        assert!(matches!(
            unlock(&layout, b"password", IDLE),
            Err(SecretCtlError::CooldownActive(_))
        ));
    }

    #[test]
    fn rotate_password_swaps_credentials_keeps_dek() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));
        let before = init(&layout, b"old-password", fast(), IDLE).unwrap();
        let dek_before = *before.dek().as_bytes();
        drop(before);

        rotate_password(&layout, b"old-password", b"new-password").unwrap();

        assert!(matches!(
            unlock(&layout, b"old-password", IDLE),
            Err(SecretCtlError::AuthenticationFailed)
        ));
        let after = unlock(&layout, b"new-password", IDLE).unwrap();
        assert_eq!(*after.dek().as_bytes(), dek_before);
    }

    #[test]
    fn session_idle_expiry() {
        let dir = TempDir::new().unwrap();
        let layout = VaultLayout::new(dir.path().join("vault"));
        let mut session = init(&layout, b"password", fast(), Duration::from_millis(10)).unwrap();

        assert!(!session.is_expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.is_expired());

        session.touch();
        assert!(!session.is_expired());
    }
}
