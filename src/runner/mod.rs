//! Sandboxed command runner — the only way secrets leave the vault
//! without being displayed.
//!
//! Secrets are injected as environment variables into a subprocess that
//! starts from a scrubbed environment (PATH, HOME, and a configured
//! allow-list survive from the parent).  Output is captured up to a
//! byte cap and sanitized: any injected value of non-trivial length
//! that appears verbatim in stdout/stderr is replaced with
//! `[REDACTED:<key>]`.  Sanitization is exact-match only — encoded
//! copies (base64, hex, URL) pass through, which is a documented
//! limitation rather than a bug.
//!
//! At most five `run` operations execute at once, process-wide; the
//! sixth queues behind a FIFO gate and can be cancelled while waiting.

use std::collections::{HashMap, VecDeque};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::crypto::keys::DataKey;
use crate::errors::{Result, SecretCtlError};
use crate::policy::pattern_matches;
use crate::vault::secret::{validate_key, Binding, SecretShape};
use crate::vault::store::VaultStore;

/// Default subprocess timeout (5 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest allowed subprocess timeout (1 hour).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Simultaneous `run` operations, process-wide.
pub const MAX_CONCURRENT_RUNS: usize = 5;

/// Grace window between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Secret values shorter than this are not worth redacting.
const MIN_REDACT_LEN: usize = 4;

/// One `run` invocation, after policy evaluation and alias expansion.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: String,
    pub args: Vec<String>,
    /// Key patterns (literal, or one trailing `*` segment wildcard).
    pub keys: Vec<String>,
    pub timeout: Option<Duration>,
    pub env_prefix: String,
    pub sanitize: bool,
    /// Explicit bindings that override whatever the matched secrets
    /// declare.  Empty means use the stored bindings.
    pub bindings: Vec<Binding>,
}

/// What a finished subprocess produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Exit code; `None` when the process died to a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    /// Environment variable names that were injected.
    pub injected: Vec<String>,
}

/// One secret value staged for injection.  Produced by `resolve` while
/// the vault is held, consumed by `execute` after it is released.
pub struct Injected {
    env_name: String,
    /// The vault key it came from (used in the redaction placeholder).
    key: String,
    value: Vec<u8>,
}

/// Derive the environment variable name for a key path: `/` and `-`
/// become `_`, the result is upper-cased and prefixed.
pub fn derive_env_name(prefix: &str, path: &str) -> String {
    let mapped: String = path
        .chars()
        .map(|c| match c {
            '/' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect();
    format!("{prefix}{mapped}")
}

/// Resolve key patterns against the vault into a concrete injection set.
///
/// - single-value secrets export their value under the key path;
/// - multi-field secrets with bindings export exactly their bindings;
/// - multi-field secrets without bindings export every field under
///   `<key>/<field>`.
fn resolve_injections(
    store: &VaultStore,
    dek: &DataKey,
    patterns: &[String],
    env_prefix: &str,
    overrides: &[Binding],
) -> Result<Vec<Injected>> {
    let mut keys: Vec<String> = Vec::new();
    for pattern in patterns {
        if pattern.ends_with('*') {
            let all = store.list(dek, None)?;
            let mut matched = false;
            for summary in &all {
                if pattern_matches(pattern, &summary.key) {
                    keys.push(summary.key.clone());
                    matched = true;
                }
            }
            if !matched {
                return Err(SecretCtlError::KeyNotFound(pattern.clone()));
            }
        } else {
            validate_key(pattern)?;
            if !store.contains(pattern)? {
                return Err(SecretCtlError::KeyNotFound(pattern.clone()));
            }
            keys.push(pattern.clone());
        }
    }
    keys.sort();
    keys.dedup();

    let mut injections = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();
    for key in &keys {
        let secret = store.get(dek, key)?;
        let bindings: &[Binding] = if overrides.is_empty() {
            &secret.meta.bindings
        } else {
            overrides
        };
        match &secret.shape {
            SecretShape::Single { value } => {
                stage(
                    &mut injections,
                    &mut seen,
                    derive_env_name(env_prefix, key),
                    key,
                    value.clone(),
                )?;
            }
            SecretShape::Multi { fields } => {
                if bindings.is_empty() {
                    for field in fields {
                        stage(
                            &mut injections,
                            &mut seen,
                            derive_env_name(env_prefix, &format!("{key}/{}", field.name)),
                            key,
                            field.value.clone(),
                        )?;
                    }
                } else {
                    for binding in bindings {
                        let field = secret.field(&binding.field).ok_or_else(|| {
                            SecretCtlError::validation(
                                "binding",
                                format!("references unknown field '{}'", binding.field),
                            )
                        })?;
                        stage(
                            &mut injections,
                            &mut seen,
                            format!("{env_prefix}{}", binding.env),
                            key,
                            field.value.to_vec(),
                        )?;
                    }
                }
            }
        }
    }

    Ok(injections)
}

fn stage(
    injections: &mut Vec<Injected>,
    seen: &mut HashMap<String, String>,
    env_name: String,
    key: &str,
    value: Vec<u8>,
) -> Result<()> {
    if seen.insert(env_name.clone(), key.to_string()).is_some() {
        return Err(SecretCtlError::EnvNameCollision(env_name));
    }
    injections.push(Injected {
        env_name,
        key: key.to_string(),
        value,
    });
    Ok(())
}

/// Resolve a run request's key patterns into the concrete injection
/// set.  The caller holds the vault for this phase only; the copied
/// values go on to `execute` without it.
pub fn resolve(store: &VaultStore, dek: &DataKey, request: &RunRequest) -> Result<Vec<Injected>> {
    resolve_injections(
        store,
        dek,
        &request.keys,
        &request.env_prefix,
        &request.bindings,
    )
}

/// Execute a resolved run request.  Policy evaluation, resolution, and
/// audit events belong to the caller; this function owns the
/// concurrency gate, the subprocess, and sanitization.  It must be
/// called without any vault lock held so up to five runs proceed in
/// parallel and the FIFO queue is observable.
pub fn execute(
    settings: &Settings,
    request: &RunRequest,
    injections: Vec<Injected>,
    cancel: Option<&AtomicBool>,
) -> Result<RunOutcome> {
    let timeout = match request.timeout {
        None => DEFAULT_TIMEOUT,
        Some(t) if t > MAX_TIMEOUT => {
            return Err(SecretCtlError::validation(
                "timeout",
                format!("cannot exceed {}s", MAX_TIMEOUT.as_secs()),
            ))
        }
        Some(t) => t,
    };

    let _permit = global_gate().acquire(cancel)?;

    let start = Instant::now();
    let mut cmd = Command::new(&request.command);
    cmd.args(&request.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear();

    // Scrubbed parent environment: PATH, HOME, and the allow-list only.
    for name in ["PATH", "HOME"]
        .iter()
        .copied()
        .chain(settings.run_env_passthrough.iter().map(String::as_str))
    {
        if let Ok(value) = std::env::var(name) {
            cmd.env(name, value);
        }
    }
    for injected in &injections {
        cmd.env(&injected.env_name, bytes_to_os(&injected.value));
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SecretCtlError::SpawnFailed(request.command.clone(), e.to_string()))?;

    let cap = settings.run_capture_limit;
    let stdout_reader = capture(child.stdout.take().expect("piped stdout"), cap);
    let stderr_reader = capture(child.stderr.take().expect("piped stderr"), cap);

    let deadline = start + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| SecretCtlError::io("waiting for the subprocess", e))?
        {
            break status;
        }
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                terminate(&mut child);
                return Err(SecretCtlError::Cancelled);
            }
        }
        if Instant::now() > deadline {
            terminate(&mut child);
            return Err(SecretCtlError::Timeout(timeout));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let stdout = stdout_reader
        .join()
        .map_err(|_| SecretCtlError::CommandFailed("stdout reader panicked".into()))?
        .ok_or(SecretCtlError::OutputTooLarge(cap))?;
    let stderr = stderr_reader
        .join()
        .map_err(|_| SecretCtlError::CommandFailed("stderr reader panicked".into()))?
        .ok_or(SecretCtlError::OutputTooLarge(cap))?;

    let redactions: Vec<(String, Vec<u8>)> = injections
        .iter()
        .filter(|i| i.value.len() >= MIN_REDACT_LEN)
        .map(|i| (i.key.clone(), i.value.clone()))
        .collect();

    let (stdout, stderr) = if request.sanitize {
        (
            sanitize_output(&stdout, &redactions),
            sanitize_output(&stderr, &redactions),
        )
    } else {
        (stdout, stderr)
    };

    Ok(RunOutcome {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: start.elapsed(),
        injected: injections.into_iter().map(|i| i.env_name).collect(),
    })
}

#[cfg(unix)]
fn bytes_to_os(bytes: &[u8]) -> std::ffi::OsString {
    use std::os::unix::ffi::OsStringExt;
    std::ffi::OsString::from_vec(bytes.to_vec())
}

#[cfg(not(unix))]
fn bytes_to_os(bytes: &[u8]) -> std::ffi::OsString {
    String::from_utf8_lossy(bytes).into_owned().into()
}

/// Capture a stream up to `cap` bytes on a worker thread.
/// Yields `None` when the cap was exceeded.
fn capture<R: std::io::Read + Send + 'static>(
    mut stream: R,
    cap: u64,
) -> std::thread::JoinHandle<Option<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        let mut overflowed = false;
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return if overflowed { None } else { Some(out) },
                Ok(n) => {
                    if overflowed {
                        continue;
                    }
                    if out.len() as u64 + n as u64 > cap {
                        // Keep draining so the child never blocks on a
                        // full pipe; the captured bytes are discarded.
                        overflowed = true;
                        out.clear();
                        continue;
                    }
                    out.extend_from_slice(&buf[..n]);
                }
                Err(_) => return if overflowed { None } else { Some(out) },
            }
        }
    })
}

/// SIGTERM, a grace window, then SIGKILL.
fn terminate(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        unsafe { libc::kill(pid, libc::SIGTERM) };
        let grace_end = Instant::now() + KILL_GRACE;
        while Instant::now() < grace_end {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Replace every exact occurrence of each injected value with
/// `[REDACTED:<key>]`.  Longer values are handled first so a value that
/// contains another is redacted as itself.
pub fn sanitize_output(data: &[u8], secrets: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut ordered: Vec<&(String, Vec<u8>)> = secrets
        .iter()
        .filter(|(_, v)| v.len() >= MIN_REDACT_LEN)
        .collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let mut out = data.to_vec();
    for (key, value) in ordered {
        let placeholder = format!("[REDACTED:{key}]");
        out = replace_bytes(&out, value, placeholder.as_bytes());
    }
    out
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if i + needle.len() <= haystack.len() && &haystack[i..i + needle.len()] == needle {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// FIFO concurrency gate
// ---------------------------------------------------------------------------

struct GateState {
    available: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// A counting semaphore with strict FIFO hand-off.
pub struct RunGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    state: Mutex<GateState>,
    cv: Condvar,
}

/// Held while a `run` executes; releasing wakes the queue head.
pub struct GatePermit {
    inner: Arc<GateInner>,
}

impl RunGate {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    available: permits,
                    queue: VecDeque::new(),
                    next_ticket: 0,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Wait for a permit in arrival order.  A set `cancel` flag while
    /// still queued withdraws the ticket and returns `Cancelled`.
    pub fn acquire(&self, cancel: Option<&AtomicBool>) -> Result<GatePermit> {
        let mut state = self.inner.state.lock().expect("gate poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);

        loop {
            let my_turn = state.available > 0 && state.queue.front() == Some(&ticket);
            if my_turn {
                state.queue.pop_front();
                state.available -= 1;
                return Ok(GatePermit {
                    inner: Arc::clone(&self.inner),
                });
            }
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    state.queue.retain(|t| *t != ticket);
                    self.inner.cv.notify_all();
                    return Err(SecretCtlError::Cancelled);
                }
            }
            let (next, _) = self
                .inner
                .cv
                .wait_timeout(state, Duration::from_millis(25))
                .expect("gate poisoned");
            state = next;
        }
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.inner.state.lock().expect("gate poisoned").queue.len()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("gate poisoned");
        state.available += 1;
        self.inner.cv.notify_all();
    }
}

fn global_gate() -> &'static RunGate {
    static GATE: OnceLock<RunGate> = OnceLock::new();
    GATE.get_or_init(|| RunGate::new(MAX_CONCURRENT_RUNS))
}
