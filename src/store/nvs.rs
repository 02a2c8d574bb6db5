//! NVS persistence for WiFi credentials.
//!
//! This module stores the credential in ESP32's Non-Volatile Storage (NVS) so
//! it persists across reboots: namespace `wifi`, string keys `ssid` and `pass`.
//! Each operation opens its own handle and drops it before returning.

use super::{CredentialStore, StoreError};
use crate::config::{Credential, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;
use log::{debug, info, warn};
use zeroize::Zeroize;

/// NVS namespace for WiFi credentials.
const NVS_NAMESPACE: &str = "wifi";

/// NVS key for the network name.
const KEY_SSID: &str = "ssid";

/// NVS key for the secret.
const KEY_PASS: &str = "pass";

/// Read buffer: longest field plus NUL terminator, with a small margin.
const READ_BUFFER_SIZE: usize = if MAX_SSID_LEN > MAX_PASSWORD_LEN {
    MAX_SSID_LEN
} else {
    MAX_PASSWORD_LEN
} + 8;

/// NVS-backed credential store.
pub struct NvsCredentialStore {
    partition: EspNvsPartition<NvsDefault>,
}

impl NvsCredentialStore {
    /// Use the default NVS partition.
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Self {
        Self { partition }
    }

    /// Take the default NVS partition and build a store on it.
    pub fn take_default() -> Result<Self, EspError> {
        Ok(Self::new(EspNvsPartition::<NvsDefault>::take()?))
    }

    fn open(&self, read_write: bool) -> Result<EspNvs<NvsDefault>, EspError> {
        EspNvs::new(self.partition.clone(), NVS_NAMESPACE, read_write)
    }
}

fn read_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Result<Option<String>, EspError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let value = nvs
        .get_str(key, &mut buf)?
        .map(|s| s.trim_end_matches('\0').to_string());
    buf.zeroize();
    Ok(value)
}

impl CredentialStore for NvsCredentialStore {
    fn load(&self) -> Option<Credential> {
        // Read-only open fails when the namespace was never written.
        let nvs = match self.open(false) {
            Ok(nvs) => nvs,
            Err(e) => {
                debug!("No WiFi namespace in NVS: {:?}", e);
                return None;
            }
        };

        let ssid = match read_str(&nvs, KEY_SSID) {
            Ok(Some(ssid)) if !ssid.is_empty() => ssid,
            Ok(_) => return None,
            Err(e) => {
                warn!("Failed to read SSID from NVS: {:?}", e);
                return None;
            }
        };
        let mut pass = match read_str(&nvs, KEY_PASS) {
            Ok(pass) => pass.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read password from NVS: {:?}", e);
                return None;
            }
        };

        let credential = Credential::new(ssid, pass.as_str());
        pass.zeroize();
        match credential {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Stored credentials are invalid: {}", e);
                None
            }
        }
    }

    fn save(&mut self, credential: &Credential) -> Result<(), StoreError> {
        let mut nvs = self.open(true)?;
        let mut previous_pass = read_str(&nvs, KEY_PASS).ok().flatten();

        nvs.set_str(KEY_PASS, credential.password())?;
        if let Err(e) = nvs.set_str(KEY_SSID, credential.ssid()) {
            // Put the old secret back so the stored pair stays consistent.
            let restored = match &previous_pass {
                Some(pass) => nvs.set_str(KEY_PASS, pass).map(|_| ()),
                None => nvs.remove(KEY_PASS).map(|_| ()),
            };
            if let Err(restore_err) = restored {
                warn!("Failed to restore previous password: {:?}", restore_err);
            }
            previous_pass.zeroize();
            return Err(e.into());
        }
        previous_pass.zeroize();

        info!("Credentials for '{}' saved to NVS", credential.ssid());
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        let mut nvs = self.open(true)?;
        nvs.remove(KEY_SSID)?;
        nvs.remove(KEY_PASS)?;
        info!("Credentials erased from NVS");
        Ok(())
    }
}
