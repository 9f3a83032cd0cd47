//! `secretctl delete` — remove a secret.

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::errors::{Result, SecretCtlError};

/// Execute the `delete` command.
pub fn execute(cli: &Cli, key: &str, force: bool) -> Result<()> {
    if !force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete secret '{key}'?"))
            .default(false)
            .interact()
            .map_err(|e| SecretCtlError::CommandFailed(format!("confirmation prompt: {e}")))?;
        if !confirmed {
            output::info("Aborted.");
            return Ok(());
        }
    }

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;
    facade.delete(Channel::Cli, key)?;
    facade.lock(Channel::Cli)?;

    output::success(&format!("Secret '{key}' deleted"));
    Ok(())
}
