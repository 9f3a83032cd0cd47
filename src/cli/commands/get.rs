//! `secretctl get` — print a secret's value.

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::errors::Result;
use crate::vault::secret::SecretShape;

/// Execute the `get` command.
pub fn execute(cli: &Cli, key: &str, field: Option<&str>, masked: bool) -> Result<()> {
    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    if masked {
        let m = facade.get_masked(Channel::Cli, key)?;
        println!("{} ({} chars)", m.masked_value, m.value_length);
    } else if let Some(field_name) = field {
        let value = facade.get_field(Channel::Cli, key, field_name)?;
        print_bytes(&value)?;
    } else {
        let secret = facade.get(Channel::Cli, key)?;
        match &secret.shape {
            SecretShape::Single { value } => print_bytes(value)?,
            SecretShape::Multi { fields } => {
                for f in fields {
                    let shown = if f.sensitive {
                        // Sensitive fields need --field to be printed.
                        "<sensitive — use --field>".to_string()
                    } else {
                        String::from_utf8_lossy(&f.value).into_owned()
                    };
                    println!("{}={shown}", f.name);
                }
            }
        }
    }

    facade.lock(Channel::Cli)?;
    Ok(())
}

fn print_bytes(value: &[u8]) -> Result<()> {
    if std::str::from_utf8(value).is_err() {
        output::warning("Value is not valid UTF-8; printing a lossy form.");
    }
    println!("{}", String::from_utf8_lossy(value));
    Ok(())
}
