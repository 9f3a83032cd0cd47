//! CLI module — Clap argument parser, output helpers, and command
//! implementations.  Every command is a thin caller of the access
//! facade; the engine never prints.

pub mod commands;
pub mod output;

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::{self, Settings, PASSWORD_ENV};
use crate::errors::{Result, SecretCtlError};
use crate::facade::Facade;
use crate::vault::VaultLayout;

/// Minimum password length to prevent trivially weak passwords.
const MIN_PASSWORD_LEN: usize = 8;

/// secretctl CLI: local encrypted secrets manager.
#[derive(Parser)]
#[command(
    name = "secretctl",
    about = "Local encrypted secrets manager with an AI-safe MCP surface",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault directory (default: $SECRETCTL_VAULT_DIR or ~/.secretctl)
    #[arg(long, global = true)]
    pub vault_dir: Option<String>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Initialize a new vault
    Init,

    /// Set a secret (single value or multi-field)
    Set {
        /// Secret key (e.g. API_KEY or database/production)
        key: String,
        /// Secret value (omit for interactive prompt or --field)
        value: Option<String>,
        /// Add a field NAME=VALUE (repeatable; makes the secret multi-field)
        #[arg(long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// Mark a field as sensitive (repeatable)
        #[arg(long = "sensitive", value_name = "NAME")]
        sensitive: Vec<String>,
        /// Bind an env var to a field: ENV=FIELD (repeatable)
        #[arg(long = "binding", value_name = "ENV=FIELD")]
        bindings: Vec<String>,
        /// Attach a tag (repeatable, max 10)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Related URL
        #[arg(long)]
        url: Option<String>,
        /// Expiry timestamp (RFC 3339)
        #[arg(long)]
        expires: Option<String>,
        /// Overwrite if the key already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Get a secret's value
    Get {
        /// Secret key
        key: String,
        /// Read one field of a multi-field secret
        #[arg(long)]
        field: Option<String>,
        /// Show the masked form instead of the plaintext
        #[arg(long)]
        masked: bool,
    },

    /// List all secrets
    List {
        /// Only secrets carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete a secret
    Delete {
        /// Secret key
        key: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Run a command with secrets injected
    Run {
        /// Key patterns to inject (repeatable; one trailing * allowed)
        #[arg(long = "key", value_name = "PATTERN", required = true)]
        keys: Vec<String>,
        /// Environment variable prefix (e.g. APP_)
        #[arg(long, default_value = "")]
        env_prefix: String,
        /// Environment alias from the policy's env_aliases
        #[arg(long)]
        env: Option<String>,
        /// Subprocess timeout in seconds (default 300, max 3600)
        #[arg(long)]
        timeout: Option<u64>,
        /// Disable output sanitization (CLI only)
        #[arg(long)]
        no_sanitize: bool,
        /// Command and arguments (after --)
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Generate a random secret and store it
    Generate {
        /// Secret key
        key: String,
        /// Length in characters
        #[arg(long, default_value = "32")]
        length: usize,
        /// Letters and digits only
        #[arg(long)]
        no_symbols: bool,
        /// Overwrite if the key already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Change the vault's master password
    RotatePassword,

    /// Inspect, verify, export, or prune the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Write an encrypted backup of the vault
    Backup {
        /// Output file path
        output: String,
        /// Use a 32-byte key file instead of a password
        #[arg(long)]
        key_file: Option<String>,
        /// Generate the key file first
        #[arg(long, requires = "key_file")]
        generate_key: bool,
        /// Include the audit log in the backup
        #[arg(long)]
        include_audit: bool,
    },

    /// Restore a vault from an encrypted backup
    Restore {
        /// Backup file path
        input: String,
        /// Target directory (default: the vault directory)
        #[arg(long)]
        target: Option<String>,
        /// Key file used at backup time
        #[arg(long)]
        key_file: Option<String>,
        /// Authenticate and show header fields only
        #[arg(long, conflicts_with = "dry_run")]
        verify_only: bool,
        /// Report what would happen without touching the target
        #[arg(long)]
        dry_run: bool,
        /// What to do when the target already holds a vault
        #[arg(long, value_enum, default_value = "error")]
        on_conflict: ConflictArg,
        /// Also restore the audit log (overwrites the existing one)
        #[arg(long)]
        with_audit: bool,
    },

    /// Report vault file permissions and policy health
    Security,

    /// Serve the MCP protocol over stdio
    McpServer,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell)
        shell: String,
    },
}

/// Audit subcommands.
#[derive(clap::Subcommand)]
pub enum AuditAction {
    /// Show recent audit records
    List {
        /// Filter by action (e.g. secret.get)
        #[arg(long)]
        action: Option<String>,
        /// Filter by source (CLI, GUI, MCP)
        #[arg(long)]
        source: Option<String>,
        /// Filter by key-hash substring
        #[arg(long)]
        key: Option<String>,
        /// Only failures (or only successes with --success true)
        #[arg(long)]
        success: Option<bool>,
        /// Number of records to show (most recent first)
        #[arg(long, default_value = "50")]
        last: usize,
    },

    /// Recompute the HMAC chain and report the first break
    Verify,

    /// Export records as JSON Lines or CSV
    Export {
        /// Output format: json or csv
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
        /// Filter by action
        #[arg(long)]
        action: Option<String>,
        /// Filter by source
        #[arg(long)]
        source: Option<String>,
    },

    /// Remove records older than a cutoff
    Prune {
        /// Remove records strictly older than this RFC 3339 timestamp
        #[arg(long)]
        before: String,
    },
}

/// Restore conflict modes as CLI values.
#[derive(Clone, Copy, clap::ValueEnum)]
pub enum ConflictArg {
    Error,
    Skip,
    Overwrite,
}

impl From<ConflictArg> for crate::backup::OnConflict {
    fn from(value: ConflictArg) -> Self {
        match value {
            ConflictArg::Error => Self::Error,
            ConflictArg::Skip => Self::Skip,
            ConflictArg::Overwrite => Self::Overwrite,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Resolve the vault layout from `--vault-dir`, the environment, or the
/// default location.
pub fn layout(cli: &Cli) -> VaultLayout {
    match &cli.vault_dir {
        Some(dir) => VaultLayout::new(dir),
        None => VaultLayout::new(config::resolve_vault_dir()),
    }
}

/// Build the facade for this invocation.
pub fn facade(cli: &Cli) -> Result<Facade> {
    let layout = layout(cli);
    let settings = Settings::load(layout.dir())?;
    Ok(Facade::new(layout, settings))
}

/// Read `SECRETCTL_PASSWORD` once, clearing it from the process
/// environment so child processes can never see it.
pub fn take_password_env() -> Option<Zeroizing<String>> {
    match std::env::var(PASSWORD_ENV) {
        Ok(pw) if !pw.is_empty() => {
            std::env::remove_var(PASSWORD_ENV);
            Some(Zeroizing::new(pw))
        }
        _ => None,
    }
}

/// Get the vault password: environment first (CI/batch), interactive
/// prompt otherwise.
///
/// Returns `Zeroizing<String>` so the password is wiped from memory on drop.
pub fn prompt_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = take_password_env() {
        return Ok(pw);
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter vault password")
        .interact()
        .map_err(|e| SecretCtlError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new password with confirmation (used during `init` and
/// rotation).  Also respects `SECRETCTL_PASSWORD` for scripted usage.
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Some(pw) = take_password_env() {
        if pw.len() < MIN_PASSWORD_LEN {
            return Err(SecretCtlError::validation(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }
        return Ok(pw);
    }

    loop {
        let password = dialoguer::Password::new()
            .with_prompt("Choose vault password")
            .with_confirmation(
                "Confirm vault password",
                "Passwords do not match, try again",
            )
            .interact()
            .map_err(|e| SecretCtlError::CommandFailed(format!("password prompt: {e}")))?;

        if password.len() < MIN_PASSWORD_LEN {
            output::warning(&format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(password));
    }
}

/// Split a `NAME=VALUE` argument.
pub fn split_pair(raw: &str, what: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(SecretCtlError::validation(
            what,
            format!("'{raw}' is not NAME=VALUE"),
        )),
    }
}
