//! Access facade — the one operation surface every channel goes
//! through.
//!
//! Each operation carries a channel tag (CLI, GUI, MCP).  The code path
//! is shared; what differs per channel is what may be returned: the MCP
//! channel never receives plaintext secret values or sensitive fields,
//! and cannot mutate the vault.  Every operation appends to the audit
//! chain while the session key material is live.

use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroizing;

use crate::audit::{AuditAction, AuditFilter, AuditLog, AuditRecord, Channel, ExportFormat};
use crate::config::Settings;
use crate::errors::{Result, SecretCtlError};
use crate::policy::PolicyLoader;
use crate::runner::{self, RunOutcome, RunRequest};
use crate::vault::secret::{index_hash, last_segment, mask_value, Binding, Secret, SecretSummary};
use crate::vault::session::{self, Session};
use crate::vault::store::{SetMode, VaultStore};
use crate::vault::VaultLayout;

/// What `get_masked` returns: shape information, never the value.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedValue {
    pub masked_value: String,
    pub value_length: usize,
}

/// What `exists` returns.
#[derive(Debug, Clone, Serialize)]
pub struct ExistsInfo {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Field descriptor without the value.
#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One `run` invocation as seen by the facade.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub command: String,
    pub args: Vec<String>,
    pub keys: Vec<String>,
    pub timeout: Option<Duration>,
    pub env_prefix: String,
    /// Environment alias applied through the policy's `env_aliases`.
    pub env: Option<String>,
    /// CLI may disable sanitization; the MCP channel cannot.
    pub sanitize: bool,
    pub bindings: Vec<Binding>,
}

struct State {
    session: Option<Session>,
    store: Option<VaultStore>,
}

/// The vault facade.  One per vault directory and process.
pub struct Facade {
    layout: VaultLayout,
    settings: Settings,
    state: Mutex<State>,
    policy: Mutex<PolicyLoader>,
    audit: AuditLog,
}

impl Facade {
    pub fn new(layout: VaultLayout, settings: Settings) -> Self {
        let audit = AuditLog::new(layout.audit_path());
        let policy = Mutex::new(PolicyLoader::new(layout.policy_path()));
        Self {
            layout,
            settings,
            state: Mutex::new(State {
                session: None,
                store: None,
            }),
            policy,
            audit,
        }
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Create a new vault and leave it unlocked.
    pub fn init(&self, password: &[u8], channel: Channel) -> Result<()> {
        let mut state = self.state.lock().expect("facade poisoned");
        let session = session::init(
            &self.layout,
            password,
            self.settings.kdf_params(),
            self.settings.idle_window(),
        )?;
        self.audit.append(
            session.audit_key(),
            AuditAction::VaultInit,
            channel,
            None,
            true,
            None,
        )?;
        state.store = Some(VaultStore::open(self.layout.clone())?);
        state.session = Some(session);
        Ok(())
    }

    /// Unlock an existing vault.
    pub fn unlock(&self, password: &[u8], channel: Channel) -> Result<()> {
        let mut state = self.state.lock().expect("facade poisoned");
        let session = session::unlock(&self.layout, password, self.settings.idle_window())?;
        self.audit.append(
            session.audit_key(),
            AuditAction::AuthUnlock,
            channel,
            None,
            true,
            None,
        )?;
        state.store = Some(VaultStore::open(self.layout.clone())?);
        state.session = Some(session);
        Ok(())
    }

    /// Lock: wipe key material and close the record store.
    pub fn lock(&self, channel: Channel) -> Result<()> {
        let mut state = self.state.lock().expect("facade poisoned");
        if let Some(session) = &state.session {
            self.audit.append(
                session.audit_key(),
                AuditAction::AuthLock,
                channel,
                None,
                true,
                None,
            )?;
        }
        state.session = None;
        state.store = None;
        Ok(())
    }

    /// Rotate the master password.  The session, if any, is dropped.
    pub fn rotate_password(&self, old: &[u8], new: &[u8]) -> Result<()> {
        let mut state = self.state.lock().expect("facade poisoned");
        state.session = None;
        state.store = None;
        drop(state);
        session::rotate_password(&self.layout, old, new)
    }

    // ------------------------------------------------------------------
    // Secret operations
    // ------------------------------------------------------------------

    pub fn list(&self, channel: Channel, tag: Option<&str>) -> Result<Vec<SecretSummary>> {
        self.with_session(channel, AuditAction::SecretList, None, |session, store| {
            store.list(session.dek(), tag)
        })
    }

    /// Presence check plus clear-side metadata.  No audit record: the
    /// operation discloses nothing that `list` does not.
    pub fn exists(&self, _channel: Channel, key: &str) -> Result<ExistsInfo> {
        let mut state = self.state.lock().expect("facade poisoned");
        let (session, store) = Self::live(&mut state, &self.audit)?;
        match store.metadata(session.dek(), key)? {
            Some(meta) => Ok(ExistsInfo {
                exists: true,
                tags: Some(meta.tags),
                expires_at: meta.expires_at,
                updated_at: Some(meta.updated_at),
            }),
            None => Ok(ExistsInfo {
                exists: false,
                tags: None,
                expires_at: None,
                updated_at: None,
            }),
        }
    }

    /// Full plaintext secret.  Not available over MCP; the request is
    /// rejected before the vault is touched.
    pub fn get(&self, channel: Channel, key: &str) -> Result<Secret> {
        if channel == Channel::Mcp {
            return Err(SecretCtlError::SensitiveFieldDenied(key.to_string()));
        }
        self.with_session(
            channel,
            AuditAction::SecretGet,
            Some(index_hash(key)),
            |session, store| store.get(session.dek(), key),
        )
    }

    /// Masked shape of a single-value secret: length and last 4
    /// characters, never the value.
    pub fn get_masked(&self, channel: Channel, key: &str) -> Result<MaskedValue> {
        self.with_session(
            channel,
            AuditAction::SecretGet,
            Some(index_hash(key)),
            |session, store| {
                let secret = store.get(session.dek(), key)?;
                let value = secret.single_value().ok_or_else(|| {
                    SecretCtlError::validation("key", "not a single-value secret")
                })?;
                let text = String::from_utf8_lossy(value);
                Ok(MaskedValue {
                    masked_value: mask_value(&text),
                    value_length: text.chars().count(),
                })
            },
        )
    }

    /// Field descriptors without values.
    pub fn list_fields(&self, channel: Channel, key: &str) -> Result<Vec<FieldInfo>> {
        self.with_session(
            channel,
            AuditAction::SecretList,
            Some(index_hash(key)),
            |session, store| {
                let secret = store.get(session.dek(), key)?;
                Ok(match &secret.shape {
                    crate::vault::secret::SecretShape::Single { .. } => vec![FieldInfo {
                        name: last_segment(&secret.key).to_string(),
                        sensitive: true,
                        hint: None,
                        kind: None,
                    }],
                    crate::vault::secret::SecretShape::Multi { fields } => fields
                        .iter()
                        .map(|f| FieldInfo {
                            name: f.name.clone(),
                            sensitive: f.sensitive,
                            hint: f.hint.clone(),
                            kind: f.kind.clone(),
                        })
                        .collect(),
                })
            },
        )
    }

    /// One field's plaintext.  Sensitive fields are denied to MCP; a
    /// CLI/GUI read of a sensitive field leaves a `secret.view_sensitive`
    /// audit event.
    pub fn get_field(&self, channel: Channel, key: &str, field_name: &str) -> Result<Vec<u8>> {
        let key_hash = index_hash(key);
        let mut state = self.state.lock().expect("facade poisoned");
        let (session, store) = Self::live(&mut state, &self.audit)?;

        let secret = store.get(session.dek(), key)?;
        let field = secret.field(field_name).ok_or_else(|| {
            SecretCtlError::KeyNotFound(format!("{key}#{field_name}"))
        })?;

        if field.sensitive && channel == Channel::Mcp {
            self.audit.append(
                session.audit_key(),
                AuditAction::SecretGet,
                channel,
                Some(key_hash),
                false,
                Some("sensitive_denied".into()),
            )?;
            return Err(SecretCtlError::SensitiveFieldDenied(field_name.to_string()));
        }

        let action = if field.sensitive {
            AuditAction::SecretViewSensitive
        } else {
            AuditAction::SecretGet
        };
        let value = field.value.to_vec();
        self.audit
            .append(session.audit_key(), action, channel, Some(key_hash), true, None)?;
        Ok(value)
    }

    /// Create or update a secret.  Not available over MCP.
    pub fn set(&self, channel: Channel, secret: Secret, mode: SetMode) -> Result<()> {
        if channel == Channel::Mcp {
            return Err(SecretCtlError::CommandFailed(
                "set is not available over MCP".into(),
            ));
        }
        let key_hash = index_hash(&secret.key);
        self.with_session(
            channel,
            AuditAction::SecretSet,
            Some(key_hash),
            |session, store| store.set(session.dek(), secret, mode),
        )
    }

    /// Delete a secret.  Not available over MCP.
    pub fn delete(&self, channel: Channel, key: &str) -> Result<()> {
        if channel == Channel::Mcp {
            return Err(SecretCtlError::CommandFailed(
                "delete is not available over MCP".into(),
            ));
        }
        self.with_session(
            channel,
            AuditAction::SecretDelete,
            Some(index_hash(key)),
            |_session, store| store.delete(key),
        )
    }

    // ------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------

    /// Policy-checked, sandboxed command execution with secret
    /// injection.
    pub fn run(
        &self,
        channel: Channel,
        spec: &RunSpec,
        cancel: Option<&AtomicBool>,
    ) -> Result<RunOutcome> {
        // 1. Policy.  MCP fails closed without a valid policy file; the
        //    interactive channels consult the policy only when present.
        let keys = {
            let mut loader = self.policy.lock().expect("policy poisoned");
            if channel == Channel::Mcp || loader.exists() {
                let policy = loader.load()?;
                policy.evaluate(&spec.command, &spec.args)?;
                // 2. Alias expansion.
                spec.keys
                    .iter()
                    .map(|k| policy.apply_alias(spec.env.as_deref(), k))
                    .collect()
            } else {
                spec.keys.clone()
            }
        };

        let request = RunRequest {
            command: spec.command.clone(),
            args: spec.args.clone(),
            keys,
            timeout: spec.timeout,
            env_prefix: spec.env_prefix.clone(),
            sanitize: spec.sanitize || channel == Channel::Mcp,
            bindings: spec.bindings.clone(),
        };

        // 3. Resolve under the vault lock, then release it: the secret
        //    bytes are copied out, and the subprocess must not block
        //    every other facade operation for its whole lifetime.  The
        //    audit key is copied so the post event can be written even
        //    if the session idles out mid-run.
        let (resolved, audit_key) = {
            let mut state = self.state.lock().expect("facade poisoned");
            let (session, store) = Self::live(&mut state, &self.audit)?;

            // Pre-execution event.
            self.audit.append(
                session.audit_key(),
                AuditAction::SecretRun,
                channel,
                None,
                true,
                None,
            )?;

            let resolved = runner::resolve(store, session.dek(), &request);
            let audit_key = Zeroizing::new(*session.audit_key());
            (resolved, audit_key)
        };

        // The FIFO gate, not the facade lock, governs run concurrency.
        let result = match resolved {
            Ok(injections) => runner::execute(&self.settings, &request, injections, cancel),
            Err(e) => Err(e),
        };

        // 4. Post-execution event, also for failures and cancellations.
        //    Re-acquire the lock so audit ids stay monotone.
        let mut state = self.state.lock().expect("facade poisoned");
        match &result {
            Ok(outcome) => {
                self.audit.append(
                    &*audit_key,
                    AuditAction::SecretRun,
                    channel,
                    None,
                    outcome.exit_code == Some(0),
                    None,
                )?;
            }
            Err(e) => {
                self.audit.append(
                    &*audit_key,
                    AuditAction::SecretRun,
                    channel,
                    None,
                    false,
                    Some(e.audit_code().to_string()),
                )?;
            }
        }
        Self::safety_lock_on_crypto_failure(&mut state, &result);

        result
    }

    // ------------------------------------------------------------------
    // Audit surface
    // ------------------------------------------------------------------

    pub fn audit_verify(&self) -> Result<u64> {
        let mut state = self.state.lock().expect("facade poisoned");
        let (session, _) = Self::live(&mut state, &self.audit)?;
        self.audit.verify(session.audit_key())
    }

    pub fn audit_prune(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().expect("facade poisoned");
        let (session, _) = Self::live(&mut state, &self.audit)?;
        self.audit.prune(session.audit_key(), before)
    }

    pub fn audit_records(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let records = self.audit.read_all()?;
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    pub fn audit_export<W: std::io::Write>(
        &self,
        out: &mut W,
        format: ExportFormat,
        filter: &AuditFilter,
    ) -> Result<u64> {
        self.audit.export(out, format, filter)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Auto-lock bookkeeping plus the locked-vault check.  Returns live
    /// session and store references with the idle deadline refreshed.
    fn live<'a>(
        state: &'a mut State,
        audit: &AuditLog,
    ) -> Result<(&'a mut Session, &'a VaultStore)> {
        let expired = state
            .session
            .as_ref()
            .map(|s| s.is_expired())
            .unwrap_or(false);
        if expired {
            if let Some(session) = &state.session {
                // Best effort: the idle lock is itself an audited event.
                let _ = audit.append(
                    session.audit_key(),
                    AuditAction::AuthLock,
                    Channel::Gui,
                    None,
                    true,
                    Some("idle_timeout".into()),
                );
            }
            state.session = None;
            state.store = None;
        }

        let State { session, store } = state;
        let session = session.as_mut().ok_or(SecretCtlError::VaultLocked)?;
        let store = store.as_ref().ok_or(SecretCtlError::VaultLocked)?;
        session.touch();
        Ok((session, store))
    }

    /// Shared wrapper: session check, operation, one audit record.
    fn with_session<T>(
        &self,
        channel: Channel,
        action: AuditAction,
        key_hash: Option<String>,
        op: impl FnOnce(&mut Session, &VaultStore) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().expect("facade poisoned");
        let (session, store) = Self::live(&mut state, &self.audit)?;

        let result = op(&mut *session, store);
        let (success, error) = match &result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.audit_code().to_string())),
        };
        self.audit
            .append(session.audit_key(), action, channel, key_hash, success, error)?;
        Self::safety_lock_on_crypto_failure(&mut state, &result);
        result
    }

    /// A `CryptoFailure` on an unlocked path means key material can no
    /// longer be trusted: wipe the session immediately.
    fn safety_lock_on_crypto_failure<T>(state: &mut State, result: &Result<T>) {
        if matches!(result, Err(SecretCtlError::CryptoFailure(_))) {
            state.session = None;
            state.store = None;
        }
    }
}

impl Drop for Facade {
    fn drop(&mut self) {
        // Keys are zeroized by the session's own Drop; this just makes
        // the wipe order explicit on normal exit.
        if let Ok(mut state) = self.state.lock() {
            state.session = None;
            state.store = None;
        }
    }
}
