//! Relay connection options.

use anyhow::{Result, bail};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_PREFIX: &str = "socket.io";

/// Where the relay's Redis lives and which channel namespace it uses.
///
/// Every process that should share rooms must use the same `prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub prefix: String,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl RelayOptions {
    /// The prefix is embedded verbatim in a `PSUBSCRIBE` pattern, so it may not
    /// be empty or carry glob metacharacters or the glob escape `\\`.
    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.prefix)
    }
}

pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("relay prefix cannot be empty");
    }
    if let Some(c) = prefix.chars().find(|c| matches!(c, '*' | '?' | '[' | '\\')) {
        bail!("relay prefix '{prefix}' contains glob character '{c}'");
    }
    Ok(())
}
