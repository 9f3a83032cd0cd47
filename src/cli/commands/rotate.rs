//! `secretctl rotate-password` — change the vault master password.
//!
//! Generates a fresh salt, re-derives the master key from the new
//! password, and re-wraps the existing DEK.  Stored records are
//! untouched.

use crate::cli::{facade, output, prompt_new_password, prompt_password, Cli};
use crate::errors::Result;

/// Execute the `rotate-password` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let facade = facade(cli)?;

    output::info("Enter your current vault password.");
    let old_password = prompt_password()?;

    output::info("Choose your new vault password.");
    let new_password = prompt_new_password()?;

    facade.rotate_password(old_password.as_bytes(), new_password.as_bytes())?;

    output::success("Master password rotated");
    Ok(())
}
