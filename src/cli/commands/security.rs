//! `secretctl security` — report on-disk security posture.

use crate::cli::{layout, output, Cli};
use crate::errors::Result;
use crate::policy::PolicyLoader;
use crate::vault::io::{usage_ratio, USAGE_WARN_RATIO};

/// Execute the `security` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let layout = layout(cli);

    if !layout.is_initialized() {
        output::warning(&format!("No vault at {}", layout.dir().display()));
        return Ok(());
    }

    check_mode(layout.dir(), 0o700, "vault directory");
    for (path, label) in [
        (layout.salt_path(), "vault.salt"),
        (layout.meta_path(), "vault.meta"),
        (layout.db_path(), "vault.db"),
        (layout.audit_path(), "audit.jsonl"),
    ] {
        if path.exists() {
            check_mode(&path, 0o600, label);
        }
    }

    let mut loader = PolicyLoader::new(layout.policy_path());
    if loader.exists() {
        match loader.load() {
            Ok(_) => output::success("mcp-policy.yaml: valid, owner-only, regular file"),
            Err(e) => output::error(&format!("mcp-policy.yaml: {e}")),
        }
    } else {
        output::info("mcp-policy.yaml: not present — MCP run operations fail closed");
    }

    if let Ok(ratio) = usage_ratio(layout.dir()) {
        if ratio > USAGE_WARN_RATIO {
            output::warning(&format!(
                "Filesystem {}% full — vault writes stop below the free-space guard",
                (ratio * 100.0) as u32
            ));
        }
    }

    Ok(())
}

#[cfg(unix)]
fn check_mode(path: &std::path::Path, expected: u32, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => {
            let mode = meta.permissions().mode() & 0o777;
            if mode == expected {
                output::success(&format!("{label}: {mode:04o}"));
            } else {
                output::warning(&format!("{label}: {mode:04o}, expected {expected:04o}"));
            }
        }
        Err(e) => output::error(&format!("{label}: {e}")),
    }
}

#[cfg(not(unix))]
fn check_mode(_path: &std::path::Path, _expected: u32, label: &str) {
    crate::cli::output::info(&format!("{label}: permission checks are Unix-only"));
}
