//! `secretctl audit` — inspect, verify, export, and prune the audit chain.

use std::str::FromStr;

use crate::audit::{AuditAction, AuditFilter, Channel, ExportFormat};
use crate::cli::commands::set::parse_rfc3339;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::errors::{Result, SecretCtlError};

/// Execute `audit list`.
pub fn execute_list(
    cli: &Cli,
    action: Option<&str>,
    source: Option<&str>,
    key: Option<&str>,
    success: Option<bool>,
    last: usize,
) -> Result<()> {
    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let filter = build_filter(action, source, key, success)?;
    let mut records = facade.audit_records(&filter)?;
    facade.lock(Channel::Cli)?;

    // Most recent first, capped at `last`.
    records.reverse();
    records.truncate(last);
    output::print_audit_table(&records);
    Ok(())
}

/// Execute `audit verify`.
pub fn execute_verify(cli: &Cli) -> Result<()> {
    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let verified = facade.audit_verify();
    facade.lock(Channel::Cli)?;

    let count = verified?;
    output::success(&format!("Audit chain intact ({count} records)"));
    Ok(())
}

/// Execute `audit export`.
pub fn execute_export(
    cli: &Cli,
    format: &str,
    output_path: Option<&str>,
    action: Option<&str>,
    source: Option<&str>,
) -> Result<()> {
    let format = match format {
        "json" => ExportFormat::Json,
        "csv" => ExportFormat::Csv,
        other => {
            return Err(SecretCtlError::validation(
                "format",
                format!("'{other}' is not json or csv"),
            ))
        }
    };

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let filter = build_filter(action, source, None, None)?;
    let written = match output_path {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .map_err(|e| SecretCtlError::io("creating the export file", e))?;
            facade.audit_export(&mut file, format, &filter)?
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            facade.audit_export(&mut lock, format, &filter)?
        }
    };
    facade.lock(Channel::Cli)?;

    output::success(&format!("Exported {written} audit records"));
    Ok(())
}

/// Execute `audit prune`.
pub fn execute_prune(cli: &Cli, before: &str) -> Result<()> {
    let cutoff = parse_rfc3339(before)?;

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let removed = facade.audit_prune(cutoff);
    facade.lock(Channel::Cli)?;

    output::success(&format!("Pruned {} audit records", removed?));
    Ok(())
}

fn build_filter(
    action: Option<&str>,
    source: Option<&str>,
    key: Option<&str>,
    success: Option<bool>,
) -> Result<AuditFilter> {
    Ok(AuditFilter {
        action: action.map(AuditAction::from_str).transpose()?,
        source: source.map(Channel::from_str).transpose()?,
        key_contains: key.map(String::from),
        from: None,
        to: None,
        success,
    })
}
