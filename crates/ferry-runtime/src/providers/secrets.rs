//! Secure credential handling for LLM providers.
//!
//! This module provides a centralized, type-safe way to handle API credentials
//! across all providers. Using this module ensures:
//!
//! - **No accidental logging**: Credentials cannot appear in Debug/Display output
//! - **Memory safety**: Credentials are zeroed on drop
//! - **Consistent patterns**: All providers use the same handling
//!
//! ## Usage
//!
//! ```ignore
//! use crate::providers::secrets::{ApiCredential, CredentialSource};
//!
//! // Load from an environment snapshot
//! let cred = ApiCredential::from_env(&env, "ANTHROPIC_API_KEY", "Anthropic API key");
//!
//! // Use in HTTP header (explicit exposure)
//! request.header("x-api-key", cred.expose());
//! ```

use ferry_core::EnvSnapshot;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Where a credential was loaded from.
///
/// This is useful for debugging configuration issues without
/// exposing the actual credential value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from an environment variable
    Environment,
    /// Placeholder for servers that accept any key
    Placeholder,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Placeholder => write!(f, "placeholder"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// This wrapper provides:
/// - Safe Debug implementation that shows `[REDACTED]`
/// - Memory zeroing on drop via `secrecy` crate
/// - Explicit exposure via `.expose()` method
/// - Source tracking for debugging
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Create a new credential from a string value.
    ///
    /// The value is immediately wrapped in SecretString and cannot
    /// be accidentally logged after this point.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load credential from an environment snapshot.
    ///
    /// Returns `None` when the variable is unset or blank.
    pub fn from_env(env: &EnvSnapshot, env_var: &str, name: &'static str) -> Option<Self> {
        env.get(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
    }

    /// Expose the credential value for use in API calls.
    ///
    /// # Security
    ///
    /// Only call this at the point where the credential is actually needed
    /// (e.g., setting an HTTP header). Never store the exposed value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().trim().is_empty()
    }

    /// Get the source of this credential.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Get the human-readable name of this credential.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// SecretString is not Clone; re-wrap the exposed value.
impl Clone for ApiCredential {
    fn clone(&self) -> Self {
        Self::new(self.expose(), self.source, self.name)
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
