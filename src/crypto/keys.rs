//! Key material helpers: HKDF-SHA256 expansion, HMAC-SHA256, the system
//! CSPRNG, and zeroize-on-drop wrappers for the two long-lived keys.
//!
//! From the Argon2id master key we derive named sub-keys via HKDF
//! (RFC 5869, extract-then-expand with empty salt).  The `info` string
//! identifies the purpose so sub-keys are independent of one another.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::TryRngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::errors::{Result, SecretCtlError};

/// Length of derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

/// HKDF info string for the audit-chain key.
pub const AUDIT_KEY_INFO: &[u8] = b"audit-log-v1";

/// HKDF info string for the backup encryption key.
pub const BACKUP_ENC_INFO: &[u8] = b"secretctl-backup-encryption";

/// HKDF info string for the backup MAC key.
pub const BACKUP_MAC_INFO: &[u8] = b"secretctl-backup-mac";

/// Fill `buf` from the operating-system CSPRNG.
///
/// Fails closed: an RNG error is reported, never papered over.
pub fn rand_bytes(buf: &mut [u8]) -> Result<()> {
    rand::rngs::OsRng
        .try_fill_bytes(buf)
        .map_err(|_| SecretCtlError::CryptoFailure("reading the system CSPRNG".into()))
}

/// Run HKDF-SHA256 expand over `ikm` with the given `info`.
///
/// The extract step uses an empty salt; the IKM already has full
/// entropy (it came from Argon2id or the CSPRNG).
pub fn hkdf_expand(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|_| SecretCtlError::CryptoFailure("expanding a sub-key".into()))?;

    Ok(okm)
}

/// Compute HMAC-SHA256 over `data`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| SecretCtlError::CryptoFailure("keying an HMAC".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], expected: &[u8]) -> Result<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| SecretCtlError::CryptoFailure("keying an HMAC".into()))?;
    mac.update(data);
    mac.verify_slice(expected)
        .map_err(|_| SecretCtlError::IntegrityFailure("HMAC mismatch".into()))
}

/// The Argon2id-derived master key.  Exists only inside an unlocked
/// session and zeroes its memory when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive the audit-chain key for this vault.
    pub fn audit_key(&self) -> Result<[u8; KEY_LEN]> {
        hkdf_expand(&self.bytes, AUDIT_KEY_INFO)
    }
}

/// The random data-encryption key that seals every record blob.
/// Stored on disk only in wrapped (AEAD-encrypted) form; zeroes its
/// memory when dropped.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct DataKey {
    bytes: [u8; KEY_LEN],
}

impl DataKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random DEK.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LEN];
        rand_bytes(&mut bytes)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}
