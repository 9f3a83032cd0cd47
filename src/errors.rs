use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors that can occur in secretctl.
#[derive(Debug, Error)]
pub enum SecretCtlError {
    // --- Vault lifecycle ---
    #[error("No vault found at {0}")]
    VaultMissing(PathBuf),

    #[error("A vault already exists at {0}")]
    VaultExists(PathBuf),

    #[error("Vault is in use by another process")]
    VaultBusy,

    #[error("Authentication failed — wrong password or corrupted vault")]
    AuthenticationFailed,

    #[error("Too many failed unlock attempts — retry in {0:?}")]
    CooldownActive(Duration),

    #[error("Vault is locked")]
    VaultLocked,

    // --- Secret operations ---
    #[error("Secret '{0}' not found")]
    KeyNotFound(String),

    #[error("Secret '{0}' already exists")]
    KeyExists(String),

    #[error("Invalid {field}: {reason}")]
    ValidationFailed { field: String, reason: String },

    #[error("Field '{0}' is sensitive and cannot be returned over this channel")]
    SensitiveFieldDenied(String),

    // --- Policy and runner ---
    #[error("Command '{0}' is not allowed by policy")]
    CommandNotAllowed(String),

    #[error("No MCP policy file found at {0}")]
    PolicyMissing(PathBuf),

    #[error("Invalid MCP policy: {0}")]
    PolicyInvalid(String),

    #[error("Environment variable name '{0}' derived from more than one key")]
    EnvNameCollision(String),

    #[error("Failed to spawn '{0}': {1}")]
    SpawnFailed(String, String),

    #[error("Subprocess output exceeded the {0}-byte capture limit")]
    OutputTooLarge(u64),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    // --- Crypto and integrity ---
    #[error("Cryptographic operation failed while {0}")]
    CryptoFailure(String),

    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    #[error("Unsupported format version {found} (this build understands up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    // --- Environment ---
    #[error("Not enough free disk space ({required} bytes required)")]
    DiskFull { required: u64 },

    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Config file error: {0}")]
    Config(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),
}

impl SecretCtlError {
    /// Wrap an IO error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Build a `ValidationFailed` for one field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for the CLI: 0 success, 1 generic failure,
    /// 2 validation failure, 3 authentication failure, 4 vault busy,
    /// 5 policy violation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ValidationFailed { .. } => 2,
            Self::AuthenticationFailed | Self::CooldownActive(_) => 3,
            Self::VaultBusy => 4,
            Self::CommandNotAllowed(_)
            | Self::PolicyMissing(_)
            | Self::PolicyInvalid(_)
            | Self::SensitiveFieldDenied(_) => 5,
            _ => 1,
        }
    }

    /// Short machine-readable code recorded in audit entries.
    pub fn audit_code(&self) -> &'static str {
        match self {
            Self::VaultMissing(_) => "vault_missing",
            Self::VaultExists(_) => "vault_exists",
            Self::VaultBusy => "vault_busy",
            Self::AuthenticationFailed => "auth_failed",
            Self::CooldownActive(_) => "cooldown",
            Self::VaultLocked => "locked",
            Self::KeyNotFound(_) => "not_found",
            Self::KeyExists(_) => "exists",
            Self::ValidationFailed { .. } => "validation",
            Self::SensitiveFieldDenied(_) => "sensitive_denied",
            Self::CommandNotAllowed(_) => "command_denied",
            Self::PolicyMissing(_) => "policy_missing",
            Self::PolicyInvalid(_) => "policy_invalid",
            Self::EnvNameCollision(_) => "env_collision",
            Self::SpawnFailed(_, _) => "spawn_failed",
            Self::OutputTooLarge(_) => "output_too_large",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::CryptoFailure(_) => "crypto",
            Self::IntegrityFailure(_) => "integrity",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::DiskFull { .. } => "disk_full",
            Self::Io { .. } => "io",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::CommandFailed(_) => "command_failed",
        }
    }
}

impl From<std::io::Error> for SecretCtlError {
    fn from(e: std::io::Error) -> Self {
        Self::io("performing file IO", e)
    }
}

/// Convenience type alias for secretctl results.
pub type Result<T> = std::result::Result<T, SecretCtlError>;
