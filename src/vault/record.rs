//! Record blob sealing: how one secret becomes ciphertext.
//!
//! Each stored record is three independently sealed sections under the
//! DEK, each with its own fresh nonce and a one-byte section label as
//! associated data:
//!
//! - `"k"` — the clear key name (so a record can be re-keyed to its name
//!   without guessing from the index hash),
//! - `"v"` — the CBOR-encoded secret body (single value or field list),
//! - `"m"` — the JSON-encoded metadata.
//!
//! Tags and expiry also travel in clear next to the sealed sections so
//! `scan` can filter without the DEK.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::aead;
use crate::crypto::keys::DataKey;
use crate::errors::{Result, SecretCtlError};
use crate::vault::secret::{Field, Secret, SecretMetadata, SecretShape};

/// One sealed record as it lives in the record store.
#[derive(Debug, Clone)]
pub struct RecordBlob {
    pub key_blob: Vec<u8>,
    pub value_blob: Vec<u8>,
    pub meta_blob: Vec<u8>,
    /// Clear tag list for server-side filtering.
    pub tags: Vec<String>,
    /// Clear expiry for server-side filtering.
    pub expires_at: Option<DateTime<Utc>>,
}

/// CBOR wire shape of the value section.
#[derive(Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
enum BodyWire {
    Single {
        #[serde(with = "serde_bytes_b64")]
        value: Vec<u8>,
    },
    Multi {
        fields: Vec<FieldWire>,
    },
}

#[derive(Serialize, Deserialize)]
struct FieldWire {
    name: String,
    #[serde(with = "serde_bytes_b64")]
    value: Vec<u8>,
    #[serde(default)]
    sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

// CBOR handles byte strings natively; this keeps the field a plain
// Vec<u8> on the wire instead of a base64 string.
mod serde_bytes_b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        serde_cbor::value::Value::deserialize(d).and_then(|v| match v {
            serde_cbor::value::Value::Bytes(b) => Ok(b),
            _ => Err(serde::de::Error::custom("expected a byte string")),
        })
    }
}

/// Seal a secret into a record blob under the DEK.
pub fn seal_record(dek: &DataKey, secret: &Secret) -> Result<RecordBlob> {
    let body = match &secret.shape {
        SecretShape::Single { value } => BodyWire::Single {
            value: value.clone(),
        },
        SecretShape::Multi { fields } => BodyWire::Multi {
            fields: fields
                .iter()
                .map(|f| FieldWire {
                    name: f.name.clone(),
                    value: f.value.clone(),
                    sensitive: f.sensitive,
                    hint: f.hint.clone(),
                    kind: f.kind.clone(),
                })
                .collect(),
        },
    };
    let body_bytes = serde_cbor::to_vec(&body)
        .map_err(|e| SecretCtlError::Serialization(format!("secret body: {e}")))?;

    let meta_bytes = serde_json::to_vec(&secret.meta)
        .map_err(|e| SecretCtlError::Serialization(format!("secret metadata: {e}")))?;

    let key = dek.as_bytes();
    Ok(RecordBlob {
        key_blob: aead::seal(key, secret.key.as_bytes(), b"k")?,
        value_blob: aead::seal(key, &body_bytes, b"v")?,
        meta_blob: aead::seal(key, &meta_bytes, b"m")?,
        tags: secret.meta.tags.clone(),
        expires_at: secret.meta.expires_at,
    })
}

/// Open a record blob back into a secret.
pub fn open_record(dek: &DataKey, blob: &RecordBlob) -> Result<Secret> {
    let key = dek.as_bytes();

    let key_bytes = aead::open(key, &blob.key_blob, b"k")?;
    let key_name = String::from_utf8(key_bytes)
        .map_err(|_| SecretCtlError::IntegrityFailure("record key is not UTF-8".into()))?;

    let body_bytes = aead::open(key, &blob.value_blob, b"v")?;
    let body: BodyWire = serde_cbor::from_slice(&body_bytes)
        .map_err(|e| SecretCtlError::Serialization(format!("secret body: {e}")))?;

    let meta_bytes = aead::open(key, &blob.meta_blob, b"m")?;
    let meta: SecretMetadata = serde_json::from_slice(&meta_bytes)
        .map_err(|e| SecretCtlError::Serialization(format!("secret metadata: {e}")))?;

    let shape = match body {
        BodyWire::Single { value } => SecretShape::Single { value },
        BodyWire::Multi { fields } => SecretShape::Multi {
            fields: fields
                .into_iter()
                .map(|f| Field {
                    name: f.name,
                    value: f.value,
                    sensitive: f.sensitive,
                    hint: f.hint,
                    kind: f.kind,
                })
                .collect(),
        },
    };

    Ok(Secret {
        key: key_name,
        shape,
        meta,
    })
}

/// Decrypt only the key name of a record (used by `list`).
pub fn open_key_name(dek: &DataKey, blob: &RecordBlob) -> Result<String> {
    let key_bytes = aead::open(dek.as_bytes(), &blob.key_blob, b"k")?;
    String::from_utf8(key_bytes)
        .map_err(|_| SecretCtlError::IntegrityFailure("record key is not UTF-8".into()))
}

/// Decrypt only the metadata of a record (used by `exists`).
pub fn open_metadata(dek: &DataKey, blob: &RecordBlob) -> Result<SecretMetadata> {
    let meta_bytes = aead::open(dek.as_bytes(), &blob.meta_blob, b"m")?;
    serde_json::from_slice(&meta_bytes)
        .map_err(|e| SecretCtlError::Serialization(format!("secret metadata: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dek() -> DataKey {
        DataKey::new([5u8; 32])
    }

    fn sample_secret() -> Secret {
        let now = Utc::now();
        Secret {
            key: "database/production".into(),
            shape: SecretShape::Multi {
                fields: vec![
                    Field {
                        name: "host".into(),
                        value: b"db.example.com".to_vec(),
                        sensitive: false,
                        hint: Some("hostname".into()),
                        kind: None,
                    },
                    Field {
                        name: "password".into(),
                        value: b"p@ss".to_vec(),
                        sensitive: true,
                        hint: None,
                        kind: Some("password".into()),
                    },
                ],
            },
            meta: SecretMetadata {
                notes: Some("primary cluster".into()),
                tags: vec!["prod".into(), "db".into()],
                created_at: now,
                updated_at: now,
                ..Default::default()
            },
        }
    }

    #[test]
    fn seal_open_roundtrip() {
        let secret = sample_secret();
        let blob = seal_record(&dek(), &secret).unwrap();
        let reopened = open_record(&dek(), &blob).unwrap();

        assert_eq!(reopened.key, secret.key);
        assert_eq!(reopened.meta.tags, secret.meta.tags);
        match reopened.shape {
            SecretShape::Multi { fields } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].value, b"db.example.com");
                assert!(fields[1].sensitive);
            }
            SecretShape::Single { .. } => panic!("shape changed"),
        }
    }

    #[test]
    fn sections_use_independent_nonces() {
        let secret = sample_secret();
        let blob = seal_record(&dek(), &secret).unwrap();
        assert_ne!(blob.key_blob[..12], blob.value_blob[..12]);
        assert_ne!(blob.value_blob[..12], blob.meta_blob[..12]);
    }

    #[test]
    fn sections_are_not_interchangeable() {
        let secret = sample_secret();
        let mut blob = seal_record(&dek(), &secret).unwrap();
        // Swap value and meta sections: AAD labels must reject both.
        std::mem::swap(&mut blob.value_blob, &mut blob.meta_blob);
        assert!(open_record(&dek(), &blob).is_err());
    }

    #[test]
    fn tampered_value_fails_auth() {
        let secret = sample_secret();
        let mut blob = seal_record(&dek(), &secret).unwrap();
        let last = blob.value_blob.len() - 1;
        blob.value_blob[last] ^= 1;
        assert!(open_record(&dek(), &blob).is_err());
    }

    #[test]
    fn key_only_open() {
        let secret = sample_secret();
        let blob = seal_record(&dek(), &secret).unwrap();
        assert_eq!(open_key_name(&dek(), &blob).unwrap(), "database/production");
    }

    #[test]
    fn single_value_roundtrip() {
        let now = Utc::now();
        let secret = Secret {
            key: "API_KEY".into(),
            shape: SecretShape::Single {
                value: b"sk-abc123xyz789".to_vec(),
            },
            meta: SecretMetadata {
                created_at: now,
                updated_at: now,
                ..Default::default()
            },
        };
        let blob = seal_record(&dek(), &secret).unwrap();
        let reopened = open_record(&dek(), &blob).unwrap();
        assert_eq!(reopened.single_value().unwrap(), b"sk-abc123xyz789");
    }
}
