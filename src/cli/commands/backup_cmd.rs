//! `secretctl backup` — write an encrypted backup file.

use std::path::Path;

use crate::backup::{create_backup, generate_key_file, load_key_file, BackupKeySource};
use crate::cli::{layout, output, prompt_password, Cli};
use crate::config::Settings;
use crate::errors::Result;

/// Execute the `backup` command.
pub fn execute(
    cli: &Cli,
    output_path: &str,
    key_file: Option<&str>,
    generate_key: bool,
    include_audit: bool,
) -> Result<()> {
    let layout = layout(cli);
    let settings = Settings::load(layout.dir())?;

    let header = match key_file {
        Some(path) => {
            let key = if generate_key {
                let key = generate_key_file(Path::new(path))?;
                output::success(&format!("Backup key written to {path}"));
                output::warning("Anyone holding this file can read the backup. Store it apart.");
                key
            } else {
                load_key_file(Path::new(path))?
            };
            create_backup(
                &layout,
                Path::new(output_path),
                &BackupKeySource::KeyFile(&key),
                include_audit,
                settings.kdf_params(),
            )?
        }
        None => {
            let password = prompt_password()?;
            create_backup(
                &layout,
                Path::new(output_path),
                &BackupKeySource::Password(password.as_bytes()),
                include_audit,
                settings.kdf_params(),
            )?
        }
    };

    output::success(&format!(
        "Backup written to {output_path} ({} secrets{})",
        header.secret_count,
        if header.includes_audit {
            ", audit log included"
        } else {
            ""
        }
    ));
    Ok(())
}
