//! Bearer credential loading

use std::path::Path;

use crate::error::{Error, Result};

/// File consulted in the working directory when nothing else is configured
pub const DEFAULT_KEY_FILE: &str = "api_key.txt";

/// Environment variable used as the last fallback
pub const API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// A bearer token, loaded once and threaded into the transport
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Credential {
    /// Wrap a token, rejecting blank values
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(Error::InvalidConfig("API key is empty".to_string()));
        }
        Ok(Self(token))
    }

    /// Read a token from a plain-text file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::CredentialFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(contents).map_err(|_| {
            Error::InvalidConfig(format!("credential file {} is empty", path.display()))
        })
    }

    /// Resolve the credential from, in order: an explicit file, a configured
    /// file, `./api_key.txt` if present, then `OPENAI_API_KEY`.
    pub fn resolve(explicit: Option<&Path>, configured: Option<&Path>) -> Result<Self> {
        resolve_from(
            explicit,
            configured,
            Path::new(DEFAULT_KEY_FILE),
            std::env::var(API_KEY_ENV_VAR).ok(),
        )
    }

    /// The raw token
    pub fn token(&self) -> &str {
        &self.0
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

fn resolve_from(
    explicit: Option<&Path>,
    configured: Option<&Path>,
    default_file: &Path,
    env_value: Option<String>,
) -> Result<Credential> {
    // A named file must be readable; falling through would hide a typo
    if let Some(path) = explicit.or(configured) {
        tracing::debug!(path = %path.display(), "loading credential from file");
        return Credential::from_file(path);
    }

    if default_file.is_file() {
        tracing::debug!(path = %default_file.display(), "loading credential from default file");
        return Credential::from_file(default_file);
    }

    match env_value {
        Some(value) => {
            tracing::debug!("loading credential from {}", API_KEY_ENV_VAR);
            Credential::new(value)
        }
        None => Err(Error::InvalidConfig(format!(
            "no API key found: pass --api-key-file, create {}, or set {}",
            DEFAULT_KEY_FILE, API_KEY_ENV_VAR
        ))),
    }
}
