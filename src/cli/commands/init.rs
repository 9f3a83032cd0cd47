//! `secretctl init` — create a new vault.

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_new_password, Cli};
use crate::errors::Result;

/// Execute the `init` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let facade = facade(cli)?;
    let password = prompt_new_password()?;

    facade.init(password.as_bytes(), Channel::Cli)?;

    output::success(&format!(
        "Vault created at {}",
        facade.layout().dir().display()
    ));
    output::tip("Run `secretctl set <KEY>` to add your first secret.");
    Ok(())
}
