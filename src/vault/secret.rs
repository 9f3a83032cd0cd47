//! Secret model: single-value and multi-field secrets, per-field
//! sensitivity, environment bindings, and metadata.
//!
//! Keys are hierarchical paths like `database/production`, segments
//! separated by `/`.  Lookup never uses the clear key name on disk;
//! records are indexed by `SHA-256(key)`.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{Result, SecretCtlError};
use crate::vault::meta::{base64_decode, base64_encode};

/// Maximum secret value size (1 MiB).
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Maximum notes size (10 KiB).
pub const MAX_NOTES_LEN: usize = 10 * 1024;

/// Maximum URL length in characters.
pub const MAX_URL_LEN: usize = 2048;

/// Maximum number of tags per secret.
pub const MAX_TAGS: usize = 10;

/// Maximum tag length in characters.
pub const MAX_TAG_LEN: usize = 64;

/// One named field inside a multi-field secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within the secret.
    pub name: String,

    /// The field value bytes.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub value: Vec<u8>,

    /// Sensitive fields are never returned in plaintext to the MCP channel.
    #[serde(default)]
    pub sensitive: bool,

    /// Optional display hint (e.g. "username", "port").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    /// Optional kind tag (e.g. "password", "token").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// The shape of a secret: one opaque value, or an ordered field list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SecretShape {
    Single {
        #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
        value: Vec<u8>,
    },
    Multi {
        fields: Vec<Field>,
    },
}

/// Mapping from an environment-variable name to a field, consumed by the
/// sandboxed runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    /// Environment variable name (before the runner prefix is applied).
    pub env: String,
    /// Name of the field the variable receives.
    pub field: String,
}

/// Clear-side metadata for a secret.  Tags and expiry are additionally
/// stored unencrypted next to the record so listing can filter without
/// unwrapping the DEK.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
}

/// A fully decrypted secret.
#[derive(Debug, Clone)]
pub struct Secret {
    pub key: String,
    pub shape: SecretShape,
    pub meta: SecretMetadata,
}

/// What `list` returns for one secret: the key plus everything that can
/// be shown without touching the value blobs.
#[derive(Debug, Clone, Serialize)]
pub struct SecretSummary {
    pub key: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub has_notes: bool,
    pub has_url: bool,
    pub updated_at: DateTime<Utc>,
}

impl Secret {
    /// Field names in declaration order (the single value reports its
    /// synthetic field name, the key's last path segment).
    pub fn field_names(&self) -> Vec<String> {
        match &self.shape {
            SecretShape::Single { .. } => vec![last_segment(&self.key).to_string()],
            SecretShape::Multi { fields } => fields.iter().map(|f| f.name.clone()).collect(),
        }
    }

    /// Look up a field by name.  Single-value secrets answer only to
    /// their synthetic field name.
    pub fn field(&self, name: &str) -> Option<FieldView<'_>> {
        match &self.shape {
            SecretShape::Single { value } => {
                if name == last_segment(&self.key) {
                    Some(FieldView {
                        name: last_segment(&self.key),
                        value,
                        sensitive: true,
                    })
                } else {
                    None
                }
            }
            SecretShape::Multi { fields } => fields.iter().find(|f| f.name == name).map(|f| {
                FieldView {
                    name: &f.name,
                    value: &f.value,
                    sensitive: f.sensitive,
                }
            }),
        }
    }

    /// The single value, if this secret has the single shape.
    pub fn single_value(&self) -> Option<&[u8]> {
        match &self.shape {
            SecretShape::Single { value } => Some(value),
            SecretShape::Multi { .. } => None,
        }
    }
}

/// Borrowed view of one field's data.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    pub name: &'a str,
    pub value: &'a [u8],
    pub sensitive: bool,
}

/// The last `/`-separated segment of a key.
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Opaque record index: lower-case hex SHA-256 of the key name.
pub fn index_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex_lower(&digest)
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Mask a value for display: values shorter than 8 characters are fully
/// masked; longer values keep their last 4 characters.
pub fn mask_value(value: &str) -> String {
    let len = value.chars().count();
    if len < 8 {
        "*".repeat(len)
    } else {
        let tail: String = value.chars().skip(len - 4).collect();
        format!("{}{}", "*".repeat(len - 4), tail)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+(/[A-Za-z0-9._-]+)*$").expect("static regex"))
}

/// Validate a secret key: `/`-separated segments of `[A-Za-z0-9._-]`,
/// total length 1..=256.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(SecretCtlError::validation("key", "cannot be empty"));
    }
    if key.len() > 256 {
        return Err(SecretCtlError::validation(
            "key",
            "cannot exceed 256 characters",
        ));
    }
    if !key_regex().is_match(key) {
        return Err(SecretCtlError::validation(
            "key",
            format!(
                "'{key}' is invalid — segments of letters, digits, '.', '_', '-' separated by '/'"
            ),
        ));
    }
    Ok(())
}

/// Validate a whole secret before it is written.
pub fn validate_secret(secret: &Secret, now: DateTime<Utc>) -> Result<()> {
    validate_key(&secret.key)?;

    match &secret.shape {
        SecretShape::Single { value } => {
            if value.len() > MAX_VALUE_LEN {
                return Err(SecretCtlError::validation(
                    "value",
                    format!("exceeds {MAX_VALUE_LEN} bytes"),
                ));
            }
        }
        SecretShape::Multi { fields } => {
            if fields.is_empty() {
                return Err(SecretCtlError::validation(
                    "fields",
                    "a multi-field secret needs at least one field",
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for field in fields {
                if field.name.is_empty() {
                    return Err(SecretCtlError::validation("field name", "cannot be empty"));
                }
                if !seen.insert(field.name.as_str()) {
                    return Err(SecretCtlError::validation(
                        "field name",
                        format!("duplicate field '{}'", field.name),
                    ));
                }
                if field.value.len() > MAX_VALUE_LEN {
                    return Err(SecretCtlError::validation(
                        "field value",
                        format!("field '{}' exceeds {MAX_VALUE_LEN} bytes", field.name),
                    ));
                }
            }
            for binding in &secret.meta.bindings {
                if !fields.iter().any(|f| f.name == binding.field) {
                    return Err(SecretCtlError::validation(
                        "binding",
                        format!("references unknown field '{}'", binding.field),
                    ));
                }
            }
        }
    }

    if let Some(notes) = &secret.meta.notes {
        if notes.len() > MAX_NOTES_LEN {
            return Err(SecretCtlError::validation(
                "notes",
                format!("exceed {MAX_NOTES_LEN} bytes"),
            ));
        }
    }
    if let Some(url) = &secret.meta.url {
        if url.chars().count() > MAX_URL_LEN {
            return Err(SecretCtlError::validation(
                "url",
                format!("exceeds {MAX_URL_LEN} characters"),
            ));
        }
    }
    if secret.meta.tags.len() > MAX_TAGS {
        return Err(SecretCtlError::validation(
            "tags",
            format!("more than {MAX_TAGS} tags"),
        ));
    }
    for tag in &secret.meta.tags {
        if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
            return Err(SecretCtlError::validation(
                "tag",
                format!("'{tag}' must be 1..={MAX_TAG_LEN} characters"),
            ));
        }
    }
    if let Some(expires) = secret.meta.expires_at {
        if secret.meta.created_at == secret.meta.updated_at && expires <= now {
            return Err(SecretCtlError::validation(
                "expires_at",
                "must be in the future",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(key: &str, shape: SecretShape) -> Secret {
        let now = Utc::now();
        Secret {
            key: key.to_string(),
            shape,
            meta: SecretMetadata {
                created_at: now,
                updated_at: now,
                ..Default::default()
            },
        }
    }

    #[test]
    fn valid_keys() {
        for key in ["API_KEY", "db-password", "aws/access_key", "a.b/c_d/e-f", "PIN"] {
            assert!(validate_key(key).is_ok(), "{key} should be valid");
        }
    }

    #[test]
    fn invalid_keys() {
        for key in ["", "/leading", "trailing/", "a//b", "sp ace", "ümlaut", "a:b"] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
        assert!(validate_key(&"a".repeat(257)).is_err());
        assert!(validate_key(&"a".repeat(256)).is_ok());
    }

    #[test]
    fn masking_matches_expected_literals() {
        assert_eq!(mask_value("sk-abc123xyz789"), "***********z789");
        assert_eq!(mask_value("1234"), "****");
        assert_eq!(mask_value("1234567"), "*******");
        assert_eq!(mask_value("12345678"), "****5678");
        assert_eq!(mask_value(""), "");
    }

    #[test]
    fn single_secret_answers_to_last_segment() {
        let s = secret(
            "aws/access_key",
            SecretShape::Single {
                value: b"AKIA".to_vec(),
            },
        );
        assert_eq!(s.field_names(), vec!["access_key"]);
        assert!(s.field("access_key").is_some());
        assert!(s.field("aws").is_none());
    }

    #[test]
    fn rejects_duplicate_field_names() {
        let s = secret(
            "db",
            SecretShape::Multi {
                fields: vec![
                    Field {
                        name: "host".into(),
                        value: b"h".to_vec(),
                        sensitive: false,
                        hint: None,
                        kind: None,
                    },
                    Field {
                        name: "host".into(),
                        value: b"h2".to_vec(),
                        sensitive: false,
                        hint: None,
                        kind: None,
                    },
                ],
            },
        );
        assert!(validate_secret(&s, Utc::now()).is_err());
    }

    #[test]
    fn rejects_binding_to_unknown_field() {
        let mut s = secret(
            "db",
            SecretShape::Multi {
                fields: vec![Field {
                    name: "host".into(),
                    value: b"h".to_vec(),
                    sensitive: false,
                    hint: None,
                    kind: None,
                }],
            },
        );
        s.meta.bindings.push(Binding {
            env: "DB_HOST".into(),
            field: "nope".into(),
        });
        assert!(validate_secret(&s, Utc::now()).is_err());
    }

    #[test]
    fn rejects_oversized_value() {
        let s = secret(
            "big",
            SecretShape::Single {
                value: vec![0u8; MAX_VALUE_LEN + 1],
            },
        );
        assert!(validate_secret(&s, Utc::now()).is_err());
    }

    #[test]
    fn rejects_past_expiry_on_create() {
        let mut s = secret(
            "exp",
            SecretShape::Single {
                value: b"v".to_vec(),
            },
        );
        s.meta.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(validate_secret(&s, Utc::now()).is_err());
    }

    #[test]
    fn rejects_too_many_tags() {
        let mut s = secret(
            "tags",
            SecretShape::Single {
                value: b"v".to_vec(),
            },
        );
        s.meta.tags = (0..11).map(|i| format!("t{i}")).collect();
        assert!(validate_secret(&s, Utc::now()).is_err());
    }

    #[test]
    fn index_hash_is_stable_hex() {
        let h = index_hash("API_KEY");
        assert_eq!(h.len(), 64);
        assert_eq!(h, index_hash("API_KEY"));
        assert_ne!(h, index_hash("API_KEY2"));
    }
}
