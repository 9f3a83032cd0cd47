//! `secretctl generate` — create and store a random secret.

use chrono::Utc;
use zeroize::Zeroizing;

use crate::audit::Channel;
use crate::cli::{facade, output, prompt_password, Cli};
use crate::crypto::keys::rand_bytes;
use crate::errors::{Result, SecretCtlError};
use crate::vault::secret::{mask_value, Secret, SecretMetadata, SecretShape};
use crate::vault::store::SetMode;

const LETTERS_DIGITS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SYMBOLS: &[u8] = b"!#$%&*+-=?@^_";

/// Execute the `generate` command.
pub fn execute(cli: &Cli, key: &str, length: usize, no_symbols: bool, force: bool) -> Result<()> {
    if length == 0 || length > 1024 {
        return Err(SecretCtlError::validation("length", "must be 1..=1024"));
    }

    let alphabet: Vec<u8> = if no_symbols {
        LETTERS_DIGITS.to_vec()
    } else {
        [LETTERS_DIGITS, SYMBOLS].concat()
    };

    // Rejection sampling keeps the choice uniform over the alphabet.
    let mut value = Zeroizing::new(String::with_capacity(length));
    let bound = (256 / alphabet.len()) * alphabet.len();
    while value.len() < length {
        let mut byte = [0u8; 1];
        rand_bytes(&mut byte)?;
        if (byte[0] as usize) < bound {
            value.push(alphabet[byte[0] as usize % alphabet.len()] as char);
        }
    }

    let now = Utc::now();
    let secret = Secret {
        key: key.to_string(),
        shape: SecretShape::Single {
            value: value.as_bytes().to_vec(),
        },
        meta: SecretMetadata {
            created_at: now,
            updated_at: now,
            ..Default::default()
        },
    };

    let facade = facade(cli)?;
    let password = prompt_password()?;
    facade.unlock(password.as_bytes(), Channel::Cli)?;
    let mode = if force { SetMode::Upsert } else { SetMode::Create };
    facade.set(Channel::Cli, secret, mode)?;
    facade.lock(Channel::Cli)?;

    output::success(&format!(
        "Generated '{key}' ({length} chars): {}",
        mask_value(&value)
    ));
    Ok(())
}
