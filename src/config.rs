use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::KdfParams;
use crate::errors::{Result, SecretCtlError};

/// Environment variable naming the vault directory.
pub const VAULT_DIR_ENV: &str = "SECRETCTL_VAULT_DIR";

/// Environment variable that bootstraps non-interactive unlock.
/// Read once and removed from the process environment.
pub const PASSWORD_ENV: &str = "SECRETCTL_PASSWORD";

/// Vault-level configuration, loaded from `<vault_dir>/config.toml`.
///
/// Every field has a sensible default so secretctl works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Minutes of inactivity before an unlocked session auto-locks.
    #[serde(default = "default_idle_lock_minutes")]
    pub idle_lock_minutes: u64,

    /// Byte cap for captured stdout/stderr of `run` subprocesses (each).
    #[serde(default = "default_run_capture_limit")]
    pub run_capture_limit: u64,

    /// Extra environment variables passed through to `run` subprocesses
    /// in addition to PATH and HOME.
    #[serde(default)]
    pub run_env_passthrough: Vec<String>,

    /// Argon2 memory cost in KiB for newly created vaults (default: 64 MiB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_idle_lock_minutes() -> u64 {
    15
}

fn default_run_capture_limit() -> u64 {
    10 * 1024 * 1024
}

fn default_argon2_memory_kib() -> u32 {
    65_536
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_lock_minutes: default_idle_lock_minutes(),
            run_capture_limit: default_run_capture_limit(),
            run_env_passthrough: Vec::new(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for inside the vault directory.
    const FILE_NAME: &'static str = "config.toml";

    /// Load settings from `<vault_dir>/config.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(vault_dir: &Path) -> Result<Self> {
        let config_path = vault_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| SecretCtlError::io("reading config.toml", e))?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            SecretCtlError::Config(format!("failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Idle auto-lock window as a `Duration`.  Auto-lock cannot be
    /// disabled; a zero setting falls back to the default window.
    pub fn idle_window(&self) -> Duration {
        let minutes = if self.idle_lock_minutes == 0 {
            default_idle_lock_minutes()
        } else {
            self.idle_lock_minutes
        };
        Duration::from_secs(minutes * 60)
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

/// Resolve the vault directory: `SECRETCTL_VAULT_DIR` if set, otherwise
/// `~/.secretctl`.
pub fn resolve_vault_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(VAULT_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => Path::new(&home).join(".secretctl"),
        _ => PathBuf::from(".secretctl"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
