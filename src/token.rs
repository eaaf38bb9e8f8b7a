//! Bearer credential for the external streaming provider.
//!
//! The token is obtained out of band (the backend runs the OAuth dance) and
//! dropped into a small TOML secrets file on the device. It is opaque to
//! this crate: we only validate its shape and keep it out of debug output.

use std::{fs, io, str::FromStr};

use veil::Redact;

use crate::error::{Error, Result};

/// Access token for the provider's REST API.
///
/// Debug output is redacted: the token grants control over the user's
/// playback and must never end up in logs.
#[derive(Clone, Redact, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccessToken(#[redact(fixed = 6)] String);

impl AccessToken {
    /// Secrets files are tiny; anything larger is not a secrets file.
    const MAX_FILE_SIZE: u64 = 1024;

    /// Loads the token from a TOML secrets file with an `access_token` key.
    pub fn from_file(path: &str) -> Result<Self> {
        let attributes = fs::metadata(path)?;
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{path} is too large"),
            )
            .into());
        }

        let contents = fs::read_to_string(path)?;
        let value = contents.parse::<toml::Value>()?;
        match value.get("access_token").and_then(toml::Value::as_str) {
            Some(token) => token.parse(),
            None => Err(Error::invalid_argument(format!(
                "{path} does not contain an access_token"
            ))),
        }
    }

    /// Returns the token for use in an `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccessToken {
    type Err = Error;

    /// Accepts any non-empty single-line token.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(Error::invalid_argument("access token malformed"));
        }
        Ok(Self(s.to_owned()))
    }
}
