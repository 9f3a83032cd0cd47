//! `secretctl run` — inject secrets into a child process.

use std::time::Duration;

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::errors::{Result, SecretCtlError};
use crate::facade::RunSpec;

/// Arguments collected by clap for `run`.
pub struct RunArgs<'a> {
    pub keys: &'a [String],
    pub env_prefix: &'a str,
    pub env: Option<&'a str>,
    pub timeout: Option<u64>,
    pub no_sanitize: bool,
    pub command: &'a [String],
}

/// Execute the `run` command.
pub fn execute(cli: &Cli, args: &RunArgs<'_>) -> Result<()> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| SecretCtlError::validation("command", "nothing to run"))?;

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let spec = RunSpec {
        command: program.clone(),
        args: rest.to_vec(),
        keys: args.keys.to_vec(),
        timeout: args.timeout.map(Duration::from_secs),
        env_prefix: args.env_prefix.to_string(),
        env: args.env.map(String::from),
        sanitize: !args.no_sanitize,
        bindings: Vec::new(),
    };

    let outcome = facade.run(Channel::Cli, &spec, None);
    facade.lock(Channel::Cli)?;
    let outcome = outcome?;

    output::info(&format!(
        "Injected {} secrets into '{}'",
        outcome.injected.len(),
        program
    ));

    // Forward captured output and the child's exit code.
    use std::io::Write;
    std::io::stdout()
        .write_all(&outcome.stdout)
        .map_err(|e| SecretCtlError::io("writing captured stdout", e))?;
    std::io::stderr()
        .write_all(&outcome.stderr)
        .map_err(|e| SecretCtlError::io("writing captured stderr", e))?;

    match outcome.exit_code {
        Some(0) => Ok(()),
        Some(code) => Err(SecretCtlError::CommandFailed(format!(
            "child process exited with code {code}"
        ))),
        None => Err(SecretCtlError::CommandFailed(
            "child process terminated by signal".into(),
        )),
    }
}
