//! Access token source.

use std::fmt;
use std::sync::Arc;

/// Where the access token comes from.
///
/// A provider is called again on every `start()`, which lets callers rotate
/// tokens between connection attempts.
#[derive(Clone)]
pub enum CredentialSource {
    Token(String),
    Provider(Arc<dyn Fn() -> String + Send + Sync>),
}

impl CredentialSource {
    /// Build a source from a token-producing closure
    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Provider(Arc::new(f))
    }

    /// Current access token
    pub fn resolve(&self) -> String {
        match self {
            Self::Token(token) => token.clone(),
            Self::Provider(provider) => provider(),
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("CredentialSource::Token(<redacted>)"),
            Self::Provider(_) => f.write_str("CredentialSource::Provider(..)"),
        }
    }
}

impl From<&str> for CredentialSource {
    fn from(token: &str) -> Self {
        Self::Token(token.to_string())
    }
}

impl From<String> for CredentialSource {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}
