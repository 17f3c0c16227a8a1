//! Persisted client session state (auth token, viewer identity, role).
//!
//! The store is injected into the runtime at construction; nothing in the
//! workspace reads session state from process-wide globals.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use chat_core::ViewerIdentity;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session value not found")]
    NotFound,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store backend failure: {0}")]
    Backend(String),
}

/// Keys held by the persisted client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    AuthToken,
    UserId,
    Role,
    DisplayName,
    Avatar,
}

impl SessionKey {
    /// Storage key name, matching the web client's cookie names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthToken => "authToken",
            Self::UserId => "user_id",
            Self::Role => "role",
            Self::DisplayName => "name",
            Self::Avatar => "avatar",
        }
    }
}

pub trait SessionStore: Send + Sync {
    fn set(&self, key: SessionKey, value: &str) -> Result<(), SessionStoreError>;

    fn get(&self, key: SessionKey) -> Result<String, SessionStoreError>;

    fn remove(&self, key: SessionKey) -> Result<(), SessionStoreError>;

    /// `get` with `NotFound` and blank values mapped to `None`.
    fn get_optional(&self, key: SessionKey) -> Result<Option<String>, SessionStoreError> {
        match self.get(key) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(SessionStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Read the viewer identity once. `None` while no user id is stored.
pub fn load_viewer_identity(
    store: &dyn SessionStore,
) -> Result<Option<ViewerIdentity>, SessionStoreError> {
    let Some(user_id) = store.get_optional(SessionKey::UserId)? else {
        debug!("viewer identity unavailable");
        return Ok(None);
    };

    Ok(Some(ViewerIdentity {
        user_id,
        role: store.get_optional(SessionKey::Role)?,
        display_name: store.get_optional(SessionKey::DisplayName)?,
        avatar: store.get_optional(SessionKey::Avatar)?,
    }))
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    data: Arc<RwLock<HashMap<SessionKey, String>>>,
}

impl InMemorySessionStore {
    /// Store pre-populated with the given values.
    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (SessionKey, String)>,
    {
        Self {
            data: Arc::new(RwLock::new(values.into_iter().collect())),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn set(&self, key: SessionKey, value: &str) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(key, value.to_owned());
        Ok(())
    }

    fn get(&self, key: SessionKey) -> Result<String, SessionStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&key).cloned().ok_or(SessionStoreError::NotFound)
    }

    fn remove(&self, key: SessionKey) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        if data.remove(&key).is_none() {
            return Err(SessionStoreError::NotFound);
        }
        Ok(())
    }
}

/// Session store backed by the OS keyring, one entry per key under `service`.
#[cfg(feature = "os-keyring")]
#[derive(Clone)]
pub struct OsKeyringSessionStore {
    service: String,
}

#[cfg(feature = "os-keyring")]
impl OsKeyringSessionStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: SessionKey) -> Result<keyring::Entry, SessionStoreError> {
        keyring::Entry::new(&self.service, key.as_str())
            .map_err(|err| SessionStoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl SessionStore for OsKeyringSessionStore {
    fn set(&self, key: SessionKey, value: &str) -> Result<(), SessionStoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|err| SessionStoreError::Backend(err.to_string()))
    }

    fn get(&self, key: SessionKey) -> Result<String, SessionStoreError> {
        self.entry(key)?.get_password().map_err(map_keyring_error)
    }

    fn remove(&self, key: SessionKey) -> Result<(), SessionStoreError> {
        self.entry(key)?
            .delete_credential()
            .map_err(map_keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn map_keyring_error(err: keyring::Error) -> SessionStoreError {
    match err {
        keyring::Error::NoEntry => SessionStoreError::NotFound,
        keyring::Error::NoStorageAccess(inner) => SessionStoreError::Unavailable(inner.to_string()),
        other => SessionStoreError::Backend(other.to_string()),
    }
}
