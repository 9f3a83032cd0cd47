//! Password-based key derivation using Argon2id.
//!
//! Argon2id is a memory-hard KDF that protects against brute-force and
//! GPU-based attacks.  Parameters are stored in `vault.meta` so the same
//! settings are used every time a vault is reopened.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::crypto::keys::rand_bytes;
use crate::errors::{Result, SecretCtlError};

/// Length of the vault salt in bytes (128 bits).
pub const SALT_LEN: usize = 16;

/// Length of the derived key in bytes (256 bits, for AES-256).
pub const KEY_LEN: usize = 32;

/// Minimum safe memory cost in KiB (8 MiB).
const MIN_MEMORY_KIB: u32 = 8_192;

/// Configurable Argon2id parameters.
///
/// Serialized into `vault.meta` at creation time so `unlock` derives
/// the exact same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65 536 = 64 MiB).
    pub memory_kib: u32,
    /// Number of iterations (default: 3).
    pub iterations: u32,
    /// Parallelism lanes (default: 4).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 32-byte master key from a password and salt using Argon2id.
///
/// The same password + salt + params will always produce the same key.
/// Enforces minimum parameters to prevent dangerously weak KDF settings.
pub fn derive_master_key(password: &[u8], salt: &[u8], kdf: &KdfParams) -> Result<[u8; KEY_LEN]> {
    if kdf.memory_kib < MIN_MEMORY_KIB {
        return Err(SecretCtlError::validation(
            "kdf.memory_kib",
            format!("must be at least {MIN_MEMORY_KIB} (got {})", kdf.memory_kib),
        ));
    }
    if kdf.iterations < 1 {
        return Err(SecretCtlError::validation(
            "kdf.iterations",
            "must be at least 1",
        ));
    }
    if kdf.parallelism < 1 {
        return Err(SecretCtlError::validation(
            "kdf.parallelism",
            "must be at least 1",
        ));
    }

    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_LEN))
        .map_err(|_| SecretCtlError::CryptoFailure("building Argon2 parameters".into()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|_| SecretCtlError::CryptoFailure("deriving the master key".into()))?;

    Ok(key)
}

/// Generate a cryptographically random 16-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    rand_bytes(&mut salt)?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tiny params so tests stay fast; production floors still apply.
    fn test_params() -> KdfParams {
        KdfParams {
            memory_kib: 8_192,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn same_inputs_same_key() {
        let salt = [1u8; SALT_LEN];
        let a = derive_master_key(b"pw", &salt, &test_params()).unwrap();
        let b = derive_master_key(b"pw", &salt, &test_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_salt_different_key() {
        let a = derive_master_key(b"pw", &[1u8; SALT_LEN], &test_params()).unwrap();
        let b = derive_master_key(b"pw", &[2u8; SALT_LEN], &test_params()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_weak_memory_cost() {
        let weak = KdfParams {
            memory_kib: 1024,
            iterations: 3,
            parallelism: 4,
        };
        assert!(derive_master_key(b"pw", &[0u8; SALT_LEN], &weak).is_err());
    }

    #[test]
    fn salts_are_random() {
        let a = generate_salt().unwrap();
        let b = generate_salt().unwrap();
        assert_ne!(a, b);
    }
}
