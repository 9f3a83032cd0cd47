//! Cryptographic primitives: AEAD, Argon2id KDF, HKDF, HMAC, CSPRNG.
//!
//! Nothing in this module logs, panics, or touches the filesystem; every
//! failure is a typed error.

pub mod aead;
pub mod kdf;
pub mod keys;
