//! WiFi provisioning for headless ESP32 devices.
//!
//! On boot the device joins the network it remembers. If there is none, or it
//! cannot be reached, it opens a setup access point with a captive portal
//! where a phone can pick a network and enter its password.
//!
//! Everything except the ESP-IDF backends (`esp32` feature) is
//! platform-independent and tested on the host.

pub mod config;
pub mod link;
pub mod platform;
pub mod portal;
pub mod provisioner;
pub mod store;

// Re-export commonly used items
pub use config::{ConfigError, Credential, ProvisionerConfig};
pub use link::{LinkController, LinkDriver, LinkError, LinkState, SimulatedDriver};
pub use platform::{HostPlatform, Platform};
pub use portal::{CaptivePortal, PortalError};
pub use provisioner::{ProvisionState, Provisioner};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError};

#[cfg(feature = "esp32")]
pub use link::EspLinkDriver;
#[cfg(feature = "esp32")]
pub use platform::EspPlatform;
#[cfg(feature = "esp32")]
pub use store::NvsCredentialStore;
