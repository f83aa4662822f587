//! Provider credential lookup
//!
//! API keys live in an external key-value store keyed by
//! `"<provider>_apikey"`. The resolver only reads them for a turn; writing
//! and clearing keys is exposed for the settings surface.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::core::models::Provider;

/// Failures raised by a [`CredentialStore`] backend.
#[derive(Debug)]
pub enum CredentialStoreError {
    /// The backend is temporarily unreachable; a fallback store may be tried.
    Unavailable(Box<dyn Error + Send + Sync>),
    /// The backend failed in a way retrying will not fix.
    Backend(Box<dyn Error + Send + Sync>),
    /// The store cannot be written to.
    ReadOnly,
    /// An empty or whitespace-only key was offered for storage.
    EmptyValue,
}

impl fmt::Display for CredentialStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialStoreError::Unavailable(err) => {
                write!(f, "credential store unavailable: {err}")
            }
            CredentialStoreError::Backend(err) => write!(f, "credential store error: {err}"),
            CredentialStoreError::ReadOnly => f.write_str("credential store is read-only"),
            CredentialStoreError::EmptyValue => f.write_str("API key must not be empty"),
        }
    }
}

impl Error for CredentialStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CredentialStoreError::Unavailable(err) | CredentialStoreError::Backend(err) => {
                Some(err.as_ref())
            }
            _ => None,
        }
    }
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialStoreError>;
    fn delete(&self, key: &str) -> Result<(), CredentialStoreError>;
}

/// An API key. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug)]
pub enum ResolveError {
    /// No key is stored for the provider.
    Unconfigured(Provider),
    Store(CredentialStoreError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Unconfigured(provider) => write!(
                f,
                "No API key configured for {provider} models. Please add your API key in settings."
            ),
            ResolveError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolveError::Store(err) => Some(err),
            ResolveError::Unconfigured(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentialStatus {
    pub provider: Provider,
    pub configured: bool,
}

/// Resolves provider credentials from a primary store, optionally falling
/// back to a second store while the primary is unavailable.
pub struct CredentialResolver {
    primary: Box<dyn CredentialStore>,
    fallback: Option<Box<dyn CredentialStore>>,
}

impl CredentialResolver {
    pub fn new(primary: impl CredentialStore + 'static) -> Self {
        Self {
            primary: Box::new(primary),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: impl CredentialStore + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn resolve(&self, provider: Provider) -> Result<Credential, ResolveError> {
        let key = provider.credential_key();
        let stored = match self.primary.get(&key) {
            Ok(value) => value,
            Err(CredentialStoreError::Unavailable(err)) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        provider = provider.id(),
                        error = %err,
                        "credential store unavailable, trying fallback"
                    );
                    fallback.get(&key).map_err(ResolveError::Store)?
                }
                None => return Err(ResolveError::Store(CredentialStoreError::Unavailable(err))),
            },
            Err(err) => return Err(ResolveError::Store(err)),
        };

        stored
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Credential)
            .ok_or(ResolveError::Unconfigured(provider))
    }

    pub fn store(&self, provider: Provider, api_key: &str) -> Result<(), CredentialStoreError> {
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            return Err(CredentialStoreError::EmptyValue);
        }
        self.primary.set(&provider.credential_key(), trimmed)?;
        debug!(provider = provider.id(), "stored API key");
        Ok(())
    }

    pub fn remove_all(&self) -> Result<(), CredentialStoreError> {
        for provider in Provider::ALL {
            self.primary.delete(&provider.credential_key())?;
        }
        debug!("removed all API keys");
        Ok(())
    }

    pub fn status(&self) -> Vec<ProviderCredentialStatus> {
        Provider::ALL
            .into_iter()
            .map(|provider| {
                let configured = match self.resolve(provider) {
                    Ok(_) => true,
                    Err(ResolveError::Unconfigured(_)) => false,
                    Err(err) => {
                        debug!(provider = provider.id(), error = %err, "credential status lookup failed");
                        false
                    }
                };
                ProviderCredentialStatus {
                    provider,
                    configured,
                }
            })
            .collect()
    }

    pub fn any_configured(&self) -> bool {
        self.status().iter().any(|status| status.configured)
    }
}

/// In-process store, used for tests and env-only sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(self, provider: Provider, api_key: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(provider.credential_key(), api_key.to_string());
        }
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialStoreError> {
        let values = self
            .values
            .lock()
            .map_err(|err| CredentialStoreError::Backend(err.to_string().into()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialStoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|err| CredentialStoreError::Backend(err.to_string().into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialStoreError> {
        let mut values = self
            .values
            .lock()
            .map_err(|err| CredentialStoreError::Backend(err.to_string().into()))?;
        values.remove(key);
        Ok(())
    }
}

/// Read-only store mapping `groq_apikey` to `GROQ_API_KEY` and so on.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    fn env_var_for(key: &str) -> String {
        Provider::ALL
            .into_iter()
            .find(|provider| provider.credential_key() == key)
            .map(Provider::env_var)
            .unwrap_or_else(|| key.to_ascii_uppercase())
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialStoreError> {
        Ok(std::env::var(Self::env_var_for(key)).ok())
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), CredentialStoreError> {
        Err(CredentialStoreError::ReadOnly)
    }

    fn delete(&self, _key: &str) -> Result<(), CredentialStoreError> {
        Err(CredentialStoreError::ReadOnly)
    }
}
