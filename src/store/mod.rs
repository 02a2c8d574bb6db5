//! Persistent credential storage.
//!
//! One network name and one secret, persisted across reboots:
//! - **ESP32** (`esp32` feature): [`NvsCredentialStore`] in the `wifi` NVS namespace
//! - **Host**: [`FileCredentialStore`], a JSON file replaced atomically
//! - **Tests**: [`MemoryCredentialStore`]
//!
//! Every store upholds the same contract: after `save(c)`, `load()` returns
//! `c`; after `erase()`, `load()` returns `None`; a failed `save` leaves the
//! previous pair in place.

mod file;
#[cfg(feature = "esp32")]
mod nvs;

pub use file::FileCredentialStore;
#[cfg(feature = "esp32")]
pub use nvs::NvsCredentialStore;

use crate::config::Credential;
use std::fmt;

/// Load, save and erase the single stored credential.
pub trait CredentialStore {
    /// Read the stored credential.
    ///
    /// Returns `None` if nothing is stored, the name is empty, or the stored
    /// data cannot be read.
    fn load(&self) -> Option<Credential>;

    /// Persist `credential`, replacing any previous one.
    fn save(&mut self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove the stored credential.
    fn erase(&mut self) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    stored: Option<Credential>,
    fail_saves: bool,
    saves: u32,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            stored: Some(credential),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail.
    pub fn fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Number of successful saves.
    pub fn saves(&self) -> u32 {
        self.saves
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<Credential> {
        self.stored.clone()
    }

    fn save(&mut self, credential: &Credential) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Io(std::io::Error::other("injected save failure")));
        }
        self.stored = Some(credential.clone());
        self.saves += 1;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        self.stored = None;
        Ok(())
    }
}

/// Errors that can occur while persisting credentials.
#[derive(Debug)]
pub enum StoreError {
    /// File system error (host store).
    Io(std::io::Error),
    /// Stored data could not be encoded.
    Format(String),
    /// NVS error (ESP32 store).
    #[cfg(feature = "esp32")]
    Nvs(esp_idf_sys::EspError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Format(msg) => write!(f, "format error: {}", msg),
            #[cfg(feature = "esp32")]
            Self::Nvs(e) => write!(f, "NVS error: {:?}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for StoreError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Nvs(e)
    }
}
