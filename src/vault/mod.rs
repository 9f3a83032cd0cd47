//! Vault engine: on-disk layout, record store, key hierarchy, sessions.

pub mod db;
pub mod io;
pub mod meta;
pub mod record;
pub mod secret;
pub mod session;
pub mod store;

pub use io::VaultLayout;
pub use secret::{Binding, Field, Secret, SecretMetadata, SecretShape, SecretSummary};
pub use session::Session;
pub use store::{SetMode, VaultStore};
