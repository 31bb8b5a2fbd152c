use crate::{AuthResponse, StorageError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

const ADMIN_ROLE: &str = "ADMIN";

/// The access credential of the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: Option<String>,
    pub role: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, role: Option<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            role,
        }
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.access_token.is_some()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

/// Durable storage for the credential so a restart keeps the session.
pub trait CredentialStorage: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, StorageError>;
    fn save(&self, credential: &Credential) -> Result<(), StorageError>;
    /// Erase the persisted copy entirely.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Keeps the credential in process memory only.
#[derive(Default)]
pub struct MemoryStorage {
    saved: Mutex<Option<Credential>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            saved: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        *self.saved.lock() = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.saved.lock() = None;
        Ok(())
    }
}

/// Persists the credential as a JSON file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStorage for FileStorage {
    fn load(&self) -> Result<Option<Credential>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_vec(credential)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Process-wide holder of the current credential, backed by a
/// [`CredentialStorage`].
///
/// Only sign-in, refresh and sign-out change the credential. Every change is
/// written through to storage.
#[derive(Clone)]
pub struct CredentialStore {
    current: Arc<RwLock<Credential>>,
    storage: Arc<dyn CredentialStorage>,
}

impl CredentialStore {
    /// Restores the persisted credential, if any.
    ///
    /// An unreadable stored credential is discarded rather than failing
    /// startup.
    pub fn restore(storage: Arc<dyn CredentialStorage>) -> Self {
        let current = match storage.load() {
            Ok(credential) => credential.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, "discarding unreadable stored credential");
                if let Err(error) = storage.clear() {
                    tracing::warn!(%error, "failed to clear stored credential");
                }
                Credential::default()
            }
        };
        Self {
            current: Arc::new(RwLock::new(current)),
            storage,
        }
    }

    #[must_use]
    pub fn credential(&self) -> Credential {
        self.current.read().clone()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.current.read().access_token.clone()
    }

    /// Replaces the credential, as on sign-in.
    pub fn set(&self, credential: Credential) -> Result<(), StorageError> {
        *self.current.write() = credential.clone();
        self.storage.save(&credential)
    }

    /// Applies a sign-in or refresh response. A response without a role
    /// keeps the current role.
    pub(crate) fn apply_auth(&self, response: AuthResponse) -> Result<Credential, StorageError> {
        let credential = {
            let mut current = self.current.write();
            current.access_token = response.access_token;
            if response.role.is_some() {
                current.role = response.role;
            }
            current.clone()
        };
        self.storage.save(&credential)?;
        Ok(credential)
    }

    /// Clears the in-memory credential and erases the persisted copy.
    pub fn sign_out(&self) -> Result<(), StorageError> {
        *self.current.write() = Credential::default();
        self.storage.clear()
    }
}
