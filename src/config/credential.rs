//! WiFi credential type.
//!
//! A [`Credential`] is the single (network name, secret) pair the device
//! persists and joins with. It is platform-independent and tested on the host.
//!
//! # Example
//!
//! ```
//! use wifi_provisioner::config::Credential;
//!
//! let cred = Credential::new("HomeNet", "secret123").unwrap();
//! assert!(!cred.is_open());
//!
//! let open = Credential::open("CafeGuest").unwrap();
//! assert!(open.is_open());
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum passphrase length for a WPA2 access point we broadcast ourselves.
///
/// Client credentials are not held to this: the radio decides whether a
/// shorter key is acceptable for the target network.
pub const MIN_AP_PASSWORD_LEN: usize = 8;

/// Network name and secret used to join a wireless network.
///
/// The secret is zeroed when the value is dropped and never shows up in
/// `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    ssid: String,
    password: String,
}

impl Credential {
    /// Create a credential, validating both fields.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let cred = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Create a credential for an open network (no secret).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate field lengths.
    ///
    /// An empty SSID is never valid; an empty password means an open network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        Ok(())
    }

    /// Network name.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Network secret (empty for open networks).
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("password", &format_args!("<{} bytes>", self.password.len()))
            .finish()
    }
}

/// Errors that can occur while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Access-point password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Access-point name prefix is empty.
    PrefixEmpty,
    /// A value could not be parsed (environment overrides).
    InvalidValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::PrefixEmpty => write!(f, "access point prefix cannot be empty"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
