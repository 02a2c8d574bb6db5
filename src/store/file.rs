//! Credential persistence for host (development) builds.
//!
//! Stores the credential as a small JSON document so it persists across runs.
//! Uses `~/.wifi-provisioner/credentials.json` by default. Saves write a
//! temporary sibling file and rename it over the old one, so a reader sees
//! either the old pair or the new pair.

use super::{CredentialStore, StoreError};
use crate::config::Credential;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

#[derive(Serialize, Deserialize, Zeroize)]
struct StoredCredential {
    ssid: String,
    pass: String,
}

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store at a specific path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default path.
    pub fn open_default() -> io::Result<Self> {
        Ok(Self::new(default_credentials_path()?))
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Get the default credentials file path.
///
/// Returns `~/.wifi-provisioner/credentials.json`
pub fn default_credentials_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".wifi-provisioner")
        .join("credentials.json"))
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<Credential> {
        let mut text = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credentials file at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read credentials file: {}", e);
                return None;
            }
        };

        let parsed = serde_json::from_str::<StoredCredential>(&text);
        text.zeroize();
        let mut stored = match parsed {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Stored credentials are corrupted: {}", e);
                return None;
            }
        };

        if stored.ssid.is_empty() {
            return None;
        }
        let credential = Credential::new(stored.ssid.as_str(), stored.pass.as_str());
        stored.zeroize();
        match credential {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Stored credentials are invalid: {}", e);
                None
            }
        }
    }

    fn save(&mut self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut stored = StoredCredential {
            ssid: credential.ssid().to_string(),
            pass: credential.password().to_string(),
        };
        let encoded = serde_json::to_string(&stored);
        stored.zeroize();
        let mut encoded = encoded.map_err(|e| StoreError::Format(e.to_string()))?;

        let temp = self.temp_path();
        let written = fs::write(&temp, &encoded).and_then(|_| fs::rename(&temp, &self.path));
        encoded.zeroize();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        info!("Credentials for '{}' saved to {:?}", credential.ssid(), self.path);
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Credentials erased");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
