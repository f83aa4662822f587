use std::error::Error;
use std::fmt;

use keyring::Entry;

use crate::core::credentials::{CredentialStore, CredentialStoreError};

const KEYRING_SERVICE: &str = "saylo";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked or inaccessible). Permanent errors surface the underlying
/// cause directly so callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    /// Returns true when the error represents a temporary outage of the
    /// platform keyring backend.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

impl From<KeyringAccessError> for CredentialStoreError {
    fn from(err: KeyringAccessError) -> Self {
        if err.is_recoverable() {
            CredentialStoreError::Unavailable(Box::new(err))
        } else {
            CredentialStoreError::Backend(Box::new(err))
        }
    }
}

/// Credential store backed by the platform keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, KeyringAccessError> {
        Entry::new(&self.service, key).map_err(KeyringAccessError::from)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialStoreError> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyringAccessError::from(err).into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialStoreError> {
        let entry = self.entry(key)?;
        entry
            .set_password(value)
            .map_err(|err| KeyringAccessError::from(err).into())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialStoreError> {
        let entry = self.entry(key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(KeyringAccessError::from(err).into()),
        }
    }
}
