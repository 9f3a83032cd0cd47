//! `secretctl restore` — restore a vault from an encrypted backup.

use std::path::Path;

use crate::backup::{load_key_file, restore_backup, BackupKeySource, OnConflict, RestoreMode};
use crate::cli::{layout, output, prompt_password, Cli, ConflictArg};
use crate::errors::Result;

/// Arguments collected by clap for `restore`.
pub struct RestoreArgs<'a> {
    pub input: &'a str,
    pub target: Option<&'a str>,
    pub key_file: Option<&'a str>,
    pub verify_only: bool,
    pub dry_run: bool,
    pub on_conflict: ConflictArg,
    pub with_audit: bool,
}

/// Execute the `restore` command.
pub fn execute(cli: &Cli, args: &RestoreArgs<'_>) -> Result<()> {
    let target = match args.target {
        Some(dir) => std::path::PathBuf::from(dir),
        None => layout(cli).dir().to_path_buf(),
    };

    let mode = if args.verify_only {
        RestoreMode::VerifyOnly
    } else if args.dry_run {
        RestoreMode::DryRun
    } else {
        RestoreMode::Apply
    };

    if args.with_audit && mode == RestoreMode::Apply {
        output::warning("The existing audit log will be replaced by the one in the backup.");
    }

    let key_bytes;
    let password;
    let key_source = match args.key_file {
        Some(path) => {
            key_bytes = load_key_file(Path::new(path))?;
            BackupKeySource::KeyFile(&key_bytes)
        }
        None => {
            password = prompt_password()?;
            BackupKeySource::Password(password.as_bytes())
        }
    };

    let report = restore_backup(
        Path::new(args.input),
        &target,
        &key_source,
        mode,
        OnConflict::from(args.on_conflict),
        args.with_audit,
    )?;

    match mode {
        RestoreMode::VerifyOnly => {
            output::success("Backup authenticated");
            output::info(&format!(
                "created {}, vault version {}, {} secrets, audit {}",
                report.header.created_at.format("%Y-%m-%d %H:%M:%S"),
                report.header.vault_version,
                report.header.secret_count,
                if report.header.includes_audit {
                    "included"
                } else {
                    "not included"
                }
            ));
        }
        RestoreMode::DryRun => {
            if report.conflict {
                output::warning("Target already holds a vault.");
            }
            output::info(&format!(
                "{} secrets would be restored",
                report.restored_secrets
            ));
        }
        RestoreMode::Apply => {
            if report.applied {
                output::success(&format!(
                    "Restored {} secrets into {}",
                    report.restored_secrets,
                    target.display()
                ));
            } else {
                output::info("Target already holds a vault; nothing restored (skip).");
            }
        }
    }
    Ok(())
}
