//! `secretctl list` — show every secret's key and metadata.

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::errors::Result;

/// Execute the `list` command.
pub fn execute(cli: &Cli, tag: Option<&str>) -> Result<()> {
    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let summaries = facade.list(Channel::Cli, tag)?;
    facade.lock(Channel::Cli)?;

    output::print_secrets_table(&summaries);
    Ok(())
}
