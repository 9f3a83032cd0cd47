//! `secretctl set` — add or update a secret.

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, split_pair, Cli};
use crate::errors::{Result, SecretCtlError};
use crate::vault::secret::{Binding, Field, Secret, SecretMetadata, SecretShape};
use crate::vault::store::SetMode;

/// Arguments collected by clap for `set`.
pub struct SetArgs<'a> {
    pub key: &'a str,
    pub value: Option<&'a str>,
    pub fields: &'a [String],
    pub sensitive: &'a [String],
    pub bindings: &'a [String],
    pub tags: &'a [String],
    pub notes: Option<&'a str>,
    pub url: Option<&'a str>,
    pub expires: Option<&'a str>,
    pub force: bool,
}

/// Execute the `set` command.
pub fn execute(cli: &Cli, args: &SetArgs<'_>) -> Result<()> {
    if args.value.is_some() && !args.fields.is_empty() {
        return Err(SecretCtlError::validation(
            "value",
            "use either a single value or --field, not both",
        ));
    }

    let shape = if args.fields.is_empty() {
        let value: Zeroizing<String> = match args.value {
            Some(v) => Zeroizing::new(v.to_string()),
            None => {
                let v = dialoguer::Password::new()
                    .with_prompt(format!("Value for {}", args.key))
                    .interact()
                    .map_err(|e| SecretCtlError::CommandFailed(format!("value prompt: {e}")))?;
                Zeroizing::new(v)
            }
        };
        SecretShape::Single {
            value: value.as_bytes().to_vec(),
        }
    } else {
        let mut fields = Vec::with_capacity(args.fields.len());
        for raw in args.fields {
            let (name, value) = split_pair(raw, "field")?;
            let sensitive = args.sensitive.contains(&name);
            fields.push(Field {
                name,
                value: value.into_bytes(),
                sensitive,
                hint: None,
                kind: None,
            });
        }
        SecretShape::Multi { fields }
    };

    let mut bindings = Vec::with_capacity(args.bindings.len());
    for raw in args.bindings {
        let (env, field) = split_pair(raw, "binding")?;
        bindings.push(Binding { env, field });
    }

    let expires_at = match args.expires {
        Some(raw) => Some(parse_rfc3339(raw)?),
        None => None,
    };

    let now = Utc::now();
    let secret = Secret {
        key: args.key.to_string(),
        shape,
        meta: SecretMetadata {
            notes: args.notes.map(String::from),
            url: args.url.map(String::from),
            tags: args.tags.to_vec(),
            expires_at,
            created_at: now,
            updated_at: now,
            bindings,
        },
    };

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;

    let mode = if args.force {
        SetMode::Upsert
    } else {
        SetMode::Create
    };
    facade.set(Channel::Cli, secret, mode)?;
    facade.lock(Channel::Cli)?;

    output::success(&format!("Secret '{}' saved", args.key));
    Ok(())
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SecretCtlError::validation("timestamp", format!("'{raw}': {e}")))
}
