//! Audit chain — tamper-evident operation history.
//!
//! One JSON record per line in `audit.jsonl`.  Each record's HMAC chains
//! from the previous record's HMAC under the audit key (HKDF-derived
//! from the master key), so editing, removing, or reordering any line
//! breaks verification at exactly that record.  The log is strictly
//! append-only through the public API; `prune` is the one sanctioned
//! rewriter and re-anchors the chain at the first surviving record.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::keys::hmac_sha256;
use crate::errors::{Result, SecretCtlError};
use crate::vault::io::{atomic_write, ensure_free_space, AUDIT_WRITE_RESERVE};
use crate::vault::secret::hex_lower;

/// Which surface an operation came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "CLI")]
    Cli,
    #[serde(rename = "GUI")]
    Gui,
    #[serde(rename = "MCP")]
    Mcp,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "CLI",
            Self::Gui => "GUI",
            Self::Mcp => "MCP",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = SecretCtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CLI" => Ok(Self::Cli),
            "GUI" => Ok(Self::Gui),
            "MCP" => Ok(Self::Mcp),
            other => Err(SecretCtlError::validation(
                "source",
                format!("unknown channel '{other}'"),
            )),
        }
    }
}

/// Every auditable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "vault.init")]
    VaultInit,
    #[serde(rename = "auth.unlock")]
    AuthUnlock,
    #[serde(rename = "auth.lock")]
    AuthLock,
    #[serde(rename = "secret.list")]
    SecretList,
    #[serde(rename = "secret.get")]
    SecretGet,
    #[serde(rename = "secret.set")]
    SecretSet,
    #[serde(rename = "secret.delete")]
    SecretDelete,
    #[serde(rename = "secret.run")]
    SecretRun,
    #[serde(rename = "secret.view_sensitive")]
    SecretViewSensitive,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VaultInit => "vault.init",
            Self::AuthUnlock => "auth.unlock",
            Self::AuthLock => "auth.lock",
            Self::SecretList => "secret.list",
            Self::SecretGet => "secret.get",
            Self::SecretSet => "secret.set",
            Self::SecretDelete => "secret.delete",
            Self::SecretRun => "secret.run",
            Self::SecretViewSensitive => "secret.view_sensitive",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = SecretCtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vault.init" => Ok(Self::VaultInit),
            "auth.unlock" => Ok(Self::AuthUnlock),
            "auth.lock" => Ok(Self::AuthLock),
            "secret.list" => Ok(Self::SecretList),
            "secret.get" => Ok(Self::SecretGet),
            "secret.set" => Ok(Self::SecretSet),
            "secret.delete" => Ok(Self::SecretDelete),
            "secret.run" => Ok(Self::SecretRun),
            "secret.view_sensitive" => Ok(Self::SecretViewSensitive),
            other => Err(SecretCtlError::validation(
                "action",
                format!("unknown action '{other}'"),
            )),
        }
    }
}

/// One line of `audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    #[serde(with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub source: Channel,
    /// `SHA-256(key_name)` in lower-case hex, when the operation names a key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub prev_hmac: String,
    pub record_hmac: String,
}

impl AuditRecord {
    /// Deterministic HMAC input: `id|action|key_hash|source|timestamp|prev_hmac`.
    ///
    /// `|` needs no escaping — every component comes from a restricted
    /// alphabet, and the timestamp normalizes to its canonical form.
    fn hmac_input(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.id,
            self.action,
            self.key.as_deref().unwrap_or(""),
            self.source,
            canonical_timestamp(&self.timestamp),
            self.prev_hmac,
        )
    }

    fn compute_hmac(&self, audit_key: &[u8]) -> Result<String> {
        let tag = hmac_sha256(audit_key, self.hmac_input().as_bytes())?;
        Ok(hex_lower(&tag))
    }
}

/// RFC 3339 with nanosecond precision, the one form used for hashing
/// and serialization.
fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

mod rfc3339_nanos {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::canonical_timestamp(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Filter for `export` and `list`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub source: Option<Channel>,
    /// Substring of the stored key hash.
    pub key_contains: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub success: Option<bool>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = self.action {
            if record.action != action {
                return false;
            }
        }
        if let Some(source) = self.source {
            if record.source != source {
                return false;
            }
        }
        if let Some(needle) = &self.key_contains {
            match &record.key {
                Some(key) if key.contains(needle.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(from) = self.from {
            if record.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if record.timestamp >= to {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        true
    }
}

/// Export serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Handle to one vault's audit log.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, chaining from the current tail.
    ///
    /// Returns the record as written.  Caller must hold the vault write
    /// side so ids stay monotone.
    pub fn append(
        &self,
        audit_key: &[u8],
        action: AuditAction,
        source: Channel,
        key_hash: Option<String>,
        success: bool,
        error: Option<String>,
    ) -> Result<AuditRecord> {
        if let Some(parent) = self.path.parent() {
            ensure_free_space(parent, AUDIT_WRITE_RESERVE)?;
        }

        let (next_id, prev_hmac) = match self.read_all()?.last() {
            Some(last) => (last.id + 1, last.record_hmac.clone()),
            None => (0, String::new()),
        };

        let mut record = AuditRecord {
            id: next_id,
            timestamp: Utc::now(),
            action,
            source,
            key: key_hash,
            success,
            error,
            prev_hmac,
            record_hmac: String::new(),
        };
        record.record_hmac = record.compute_hmac(audit_key)?;

        let line = serde_json::to_string(&record)
            .map_err(|e| SecretCtlError::Serialization(format!("audit record: {e}")))?;

        let mut open = OpenOptions::new();
        open.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(0o600);
        }
        let mut file = open
            .open(&self.path)
            .map_err(|e| SecretCtlError::io("opening audit.jsonl", e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| SecretCtlError::io("appending to audit.jsonl", e))?;

        Ok(record)
    }

    /// Parse every line of the log.  A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| SecretCtlError::io("reading audit.jsonl", e))?;

        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(line).map_err(|e| {
                SecretCtlError::IntegrityFailure(format!(
                    "audit.jsonl line {} is not a valid record: {e}",
                    lineno + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Walk the chain from record 0, recomputing every HMAC.
    ///
    /// Returns the number of verified records; reports the first broken
    /// record and stops there.
    pub fn verify(&self, audit_key: &[u8]) -> Result<u64> {
        let records = self.read_all()?;
        let mut prev_hmac = String::new();

        for record in &records {
            if record.prev_hmac != prev_hmac {
                return Err(SecretCtlError::IntegrityFailure(format!(
                    "audit record {} does not chain from its predecessor",
                    record.id
                )));
            }
            let expected = record.compute_hmac(audit_key)?;
            if expected != record.record_hmac {
                return Err(SecretCtlError::IntegrityFailure(format!(
                    "audit record {} failed HMAC verification",
                    record.id
                )));
            }
            prev_hmac = record.record_hmac.clone();
        }

        Ok(records.len() as u64)
    }

    /// Remove records strictly older than `before`.
    ///
    /// Survivors are re-chained from a fresh anchor: the first one's
    /// `prev_hmac` becomes the empty string, and every survivor's HMAC
    /// is recomputed in sequence (each HMAC covers `prev_hmac`, so the
    /// new anchor ripples through the whole tail).  The rewrite is
    /// persisted atomically.
    pub fn prune(&self, audit_key: &[u8], before: DateTime<Utc>) -> Result<u64> {
        let records = self.read_all()?;
        let total = records.len();

        let mut survivors: Vec<AuditRecord> =
            records.into_iter().filter(|r| r.timestamp >= before).collect();
        let removed = (total - survivors.len()) as u64;

        if removed > 0 {
            let mut prev = String::new();
            for record in survivors.iter_mut() {
                record.prev_hmac = prev.clone();
                record.record_hmac = record.compute_hmac(audit_key)?;
                prev = record.record_hmac.clone();
            }
        }

        let mut out = String::new();
        for record in &survivors {
            let line = serde_json::to_string(record)
                .map_err(|e| SecretCtlError::Serialization(format!("audit record: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        atomic_write(&self.path, out.as_bytes())?;

        Ok(removed)
    }

    /// Stream matching records into `out` as JSON Lines or CSV.
    pub fn export<W: Write>(
        &self,
        out: &mut W,
        format: ExportFormat,
        filter: &AuditFilter,
    ) -> Result<u64> {
        let records = self.read_all()?;
        let mut written = 0u64;

        if format == ExportFormat::Csv {
            writeln!(
                out,
                "id,timestamp,action,source,key,success,error,prev_hmac,record_hmac"
            )
            .map_err(|e| SecretCtlError::io("writing audit export", e))?;
        }

        for record in records.iter().filter(|r| filter.matches(r)) {
            match format {
                ExportFormat::Json => {
                    let line = serde_json::to_string(record)
                        .map_err(|e| SecretCtlError::Serialization(format!("audit record: {e}")))?;
                    writeln!(out, "{line}")
                        .map_err(|e| SecretCtlError::io("writing audit export", e))?;
                }
                ExportFormat::Csv => {
                    writeln!(
                        out,
                        "{},{},{},{},{},{},{},{},{}",
                        record.id,
                        canonical_timestamp(&record.timestamp),
                        record.action,
                        record.source,
                        record.key.as_deref().unwrap_or(""),
                        record.success,
                        record.error.as_deref().unwrap_or(""),
                        record.prev_hmac,
                        record.record_hmac,
                    )
                    .map_err(|e| SecretCtlError::io("writing audit export", e))?;
                }
            }
            written += 1;
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: [u8; 32] = [0x42u8; 32];

    fn log(dir: &TempDir) -> AuditLog {
        AuditLog::new(dir.path().join("audit.jsonl"))
    }

    fn append_n(log: &AuditLog, n: usize) {
        for i in 0..n {
            log.append(
                &KEY,
                AuditAction::SecretSet,
                Channel::Cli,
                Some(format!("{i:064}")),
                true,
                None,
            )
            .unwrap();
        }
    }

    #[test]
    fn ids_are_monotone_from_zero() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 3);

        let records = log.read_all().unwrap();
        assert_eq!(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(records[0].prev_hmac, "");
        assert_eq!(records[1].prev_hmac, records[0].record_hmac);
    }

    #[test]
    fn verify_accepts_intact_chain() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 5);
        assert_eq!(log.verify(&KEY).unwrap(), 5);
    }

    #[test]
    fn verify_accepts_empty_log() {
        let dir = TempDir::new().unwrap();
        assert_eq!(log(&dir).verify(&KEY).unwrap(), 0);
    }

    #[test]
    fn tampered_field_breaks_verify_at_that_record() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 4);

        let mut records = log.read_all().unwrap();
        records[2].success = false;
        let rewritten: String = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect();
        std::fs::write(log.path(), rewritten).unwrap();

        let err = log.verify(&KEY).unwrap_err();
        assert!(err.to_string().contains("record 2"), "got: {err}");
    }

    #[test]
    fn removed_record_breaks_verify() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 4);

        let records = log.read_all().unwrap();
        let rewritten: String = records
            .iter()
            .filter(|r| r.id != 1)
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect();
        std::fs::write(log.path(), rewritten).unwrap();

        assert!(log.verify(&KEY).is_err());
    }

    #[test]
    fn reordered_records_break_verify() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 3);

        let mut records = log.read_all().unwrap();
        records.swap(1, 2);
        let rewritten: String = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect();
        std::fs::write(log.path(), rewritten).unwrap();

        assert!(log.verify(&KEY).is_err());
    }

    #[test]
    fn wrong_key_fails_verify() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 2);
        assert!(log.verify(&[0u8; 32]).is_err());
    }

    #[test]
    fn prune_reanchors_the_chain() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 3);
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        append_n(&log, 2);

        let removed = log.prune(&KEY, cutoff).unwrap();
        assert_eq!(removed, 3);

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prev_hmac, "");
        assert_eq!(records[1].prev_hmac, records[0].record_hmac);
        assert_eq!(log.verify(&KEY).unwrap(), 2);
    }

    #[test]
    fn prune_of_nothing_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        append_n(&log, 2);
        let before_records = log.read_all().unwrap();

        let removed = log
            .prune(&KEY, Utc::now() - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(removed, 0);
        let after = log.read_all().unwrap();
        assert_eq!(after[0].record_hmac, before_records[0].record_hmac);
        assert_eq!(log.verify(&KEY).unwrap(), 2);
    }

    #[test]
    fn export_filters_and_formats() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        log.append(&KEY, AuditAction::AuthUnlock, Channel::Cli, None, true, None)
            .unwrap();
        log.append(
            &KEY,
            AuditAction::SecretGet,
            Channel::Mcp,
            Some("ab".repeat(32)),
            false,
            Some("not_found".into()),
        )
        .unwrap();

        let mut json = Vec::new();
        let filter = AuditFilter {
            source: Some(Channel::Mcp),
            ..Default::default()
        };
        let n = log.export(&mut json, ExportFormat::Json, &filter).unwrap();
        assert_eq!(n, 1);
        let text = String::from_utf8(json).unwrap();
        assert!(text.contains("\"secret.get\""));
        assert!(text.contains("\"MCP\""));

        let mut csv = Vec::new();
        log.export(&mut csv, ExportFormat::Csv, &AuditFilter::default())
            .unwrap();
        let text = String::from_utf8(csv).unwrap();
        assert!(text.starts_with("id,timestamp,action"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn failed_ops_are_recorded_with_codes() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        log.append(
            &KEY,
            AuditAction::SecretRun,
            Channel::Mcp,
            None,
            false,
            Some("command_denied".into()),
        )
        .unwrap();

        let records = log.read_all().unwrap();
        assert!(!records[0].success);
        assert_eq!(records[0].error.as_deref(), Some("command_denied"));
        assert_eq!(log.verify(&KEY).unwrap(), 1);
    }
}
