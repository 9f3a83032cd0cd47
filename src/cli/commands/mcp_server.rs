//! `secretctl mcp-server` — serve the MCP protocol over stdio.
//!
//! The vault is unlocked from `SECRETCTL_PASSWORD` (read once, then
//! cleared from the environment) so the agent process never handles the
//! password itself.

use crate::audit::Channel;
use crate::cli::{facade, take_password_env, Cli};
use crate::errors::{Result, SecretCtlError};
use crate::mcp::McpServer;

/// Execute the `mcp-server` command.
pub fn execute(cli: &Cli) -> Result<()> {
    let password = take_password_env().ok_or_else(|| {
        SecretCtlError::CommandFailed(
            "mcp-server needs SECRETCTL_PASSWORD in the environment".into(),
        )
    })?;

    let facade = facade(cli)?;
    facade.unlock(password.as_bytes(), Channel::Mcp)?;
    drop(password);

    let server = McpServer::new(facade);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    server.serve(stdin.lock(), stdout.lock())?;

    // EOF: the client went away.  Lock before exiting.
    server.facade().lock(Channel::Mcp)?;
    Ok(())
}
