//! Credential handling for the remote services docket talks to.
//!
//! Two secrets exist: the LLM API key (required for explanations) and the
//! Socrata app token (optional, raises the portal's rate limit). Both are
//! held as [`ApiCredential`], which never prints its value.
//!
//! ```ignore
//! let key = ApiCredential::from_config_or_env(None, "ANTHROPIC_API_KEY", "Anthropic API key")?;
//! request.header("x-api-key", key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use thiserror::Error;

/// Environment variable holding the optional Socrata app token.
pub const SOCRATA_APP_TOKEN_ENV: &str = "SOCRATA_APP_TOKEN";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CredentialError {
    #[error("{name} required: set '{config_key}' in config or {env_var} environment variable")]
    Missing {
        name: &'static str,
        config_key: &'static str,
        env_var: String,
    },
}

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A secret string with its provenance.
///
/// `Debug` and `Display` show `[REDACTED]`; the value is only reachable
/// through [`ApiCredential::expose`], which should be called at the point
/// the header is written.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read a credential from the environment. Unset or blank is `None`.
    pub fn from_env(env_var: &str, name: &'static str) -> Option<Self> {
        std::env::var(env_var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| Self::new(v, CredentialSource::Environment, name))
    }

    /// Prefer an explicit config value, then the environment.
    pub fn from_config_or_env(
        configured: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, CredentialError> {
        if let Some(value) = configured.filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        Self::from_env(env_var, name).ok_or_else(|| CredentialError::Missing {
            name,
            config_key: "api_key",
            env_var: env_var.to_string(),
        })
    }

    /// Whether [`from_config_or_env`](Self::from_config_or_env) would succeed.
    pub fn is_available(configured: Option<&str>, env_var: &str) -> bool {
        configured.is_some_and(|v| !v.trim().is_empty())
            || std::env::var(env_var).is_ok_and(|v| !v.trim().is_empty())
    }

    /// The raw value. Do not store the returned slice.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
