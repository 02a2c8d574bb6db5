//! Radio link abstraction.
//!
//! This module separates the radio driver from the link state machine:
//! - **ESP32** (`esp32` feature): [`EspLinkDriver`] over ESP-IDF `EspWifi`
//! - **Host**: [`SimulatedDriver`], a scripted radio for development and tests
//!
//! [`LinkController`] wraps either driver, owns the current [`LinkState`] and
//! implements the bounded join wait on top of the driver's non-blocking
//! association primitives.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wifi_provisioner::config::Credential;
//! use wifi_provisioner::link::{LinkController, LinkState, SimulatedDriver};
//! use wifi_provisioner::platform::HostPlatform;
//!
//! let driver = SimulatedDriver::new().with_network("HomeNet", "secret123", -48);
//! let mut link = LinkController::new(driver, Duration::from_millis(10));
//!
//! let cred = Credential::new("HomeNet", "secret123").unwrap();
//! assert!(link.join_as_client(&HostPlatform, &cred, Duration::from_secs(1)));
//! assert!(matches!(link.current_state(), LinkState::Connected { .. }));
//! ```

#[cfg(feature = "esp32")]
mod esp;
mod simulated;

#[cfg(feature = "esp32")]
pub use esp::EspLinkDriver;
pub use simulated::SimulatedDriver;

use crate::config::{Credential, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_AP_PASSWORD_LEN};
use crate::platform::Platform;
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Observable state of the radio link. Exactly one holds at any instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Not associated, no access point.
    Disconnected,
    /// A client join is in progress.
    Connecting,
    /// Associated with `ssid` and holding `address`.
    Connected { ssid: String, address: Ipv4Addr },
    /// Setup access point is up and no client link exists.
    ApActive,
}

impl LinkState {
    /// Render the short HTML fragment served at `/status`.
    pub fn status_html(&self) -> String {
        match self {
            Self::Connected { ssid, address } => format!(
                "Connected to <b>{}</b><br>IP: <b>{}</b>",
                escape_html(ssid),
                address
            ),
            Self::Connecting => "Trying to connect\u{2026}".to_string(),
            Self::Disconnected | Self::ApActive => "Not connected.".to_string(),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected { ssid, address } => write!(f, "connected:{}@{}", ssid, address),
            Self::ApActive => write!(f, "ap-active"),
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedNetwork {
    /// Advertised network name.
    pub ssid: String,
    /// Received signal strength in dBm.
    pub rssi: i8,
}

/// Settings for the setup access point.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Advertised name.
    pub ssid: String,
    /// WPA2 password (8-64 bytes).
    pub password: String,
    /// Fixed gateway address.
    pub address: Ipv4Addr,
    /// Subnet prefix length.
    pub prefix_len: u8,
}

impl AccessPointConfig {
    /// Check the name and password against radio limits.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.ssid.is_empty() || self.ssid.len() > MAX_SSID_LEN {
            return Err(LinkError::InvalidSsid);
        }
        if self.password.len() < MIN_AP_PASSWORD_LEN || self.password.len() > MAX_PASSWORD_LEN {
            return Err(LinkError::InvalidPassword);
        }
        Ok(())
    }
}

impl fmt::Debug for AccessPointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPointConfig")
            .field("ssid", &self.ssid)
            .field("address", &self.address)
            .field("prefix_len", &self.prefix_len)
            .finish_non_exhaustive()
    }
}

/// Low-level radio operations.
///
/// All methods except [`LinkDriver::scan`] must return promptly: association
/// is requested with [`LinkDriver::begin_join`] and observed by polling
/// [`LinkDriver::is_associated`].
pub trait LinkDriver {
    /// Run a fresh scan. May take several seconds.
    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError>;

    /// Configure client mode for `credential` and request association.
    ///
    /// If the access point is up the radio stays in dual mode.
    fn begin_join(&mut self, credential: &Credential) -> Result<(), LinkError>;

    /// True once associated and an address has been assigned.
    fn is_associated(&mut self) -> bool;

    /// Client address, if any.
    fn client_address(&self) -> Option<Ipv4Addr>;

    /// Drop the client association (or stop trying).
    fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Bring up the access point.
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), LinkError>;

    /// Tear down the access point, leaving client mode only.
    fn stop_access_point(&mut self) -> Result<(), LinkError>;

    /// Station hardware address.
    fn mac_address(&self) -> [u8; 6];

    /// Register a local hostname (mDNS). Best effort.
    fn register_hostname(&mut self, _hostname: &str, _http_port: u16) -> Result<(), LinkError> {
        Err(LinkError::Unsupported)
    }
}

/// Scan access and link state, as seen by portal request handlers.
pub trait LinkView {
    /// Run a fresh scan.
    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError>;

    /// Current link state.
    fn state(&self) -> LinkState;
}

/// A join in progress.
#[derive(Debug)]
struct PendingJoin {
    ssid: String,
}

/// Link state machine over a [`LinkDriver`].
pub struct LinkController<D: LinkDriver> {
    driver: D,
    state: LinkState,
    ap_active: bool,
    joining: Option<PendingJoin>,
    poll_interval: Duration,
}

impl<D: LinkDriver> LinkController<D> {
    /// Wrap a driver. `poll_interval` paces association checks.
    pub fn new(driver: D, poll_interval: Duration) -> Self {
        Self {
            driver,
            state: LinkState::Disconnected,
            ap_active: false,
            joining: None,
            poll_interval,
        }
    }

    /// Current link state.
    pub fn current_state(&self) -> LinkState {
        self.state.clone()
    }

    /// Whether the setup access point is up.
    pub fn is_ap_active(&self) -> bool {
        self.ap_active
    }

    /// Whether a client association holds right now.
    ///
    /// Notices a dropped association and falls back to the idle state.
    pub fn is_connected(&mut self) -> bool {
        if !matches!(self.state, LinkState::Connected { .. }) {
            return false;
        }
        if self.driver.is_associated() {
            return true;
        }
        warn!("Client association lost");
        self.state = self.idle_state();
        false
    }

    /// Run a fresh scan.
    pub fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        let networks = self.driver.scan()?;
        debug!("Scan found {} networks", networks.len());
        Ok(networks)
    }

    /// Start a non-blocking join. Completion is observed with [`poll_join`].
    ///
    /// [`poll_join`]: LinkController::poll_join
    pub fn begin_join(&mut self, credential: &Credential) -> Result<(), LinkError> {
        info!("Joining '{}'", credential.ssid());
        debug!("Password length: {} bytes", credential.password().len());

        if let Err(e) = self.driver.begin_join(credential) {
            self.state = self.idle_state();
            return Err(e);
        }
        self.joining = Some(PendingJoin {
            ssid: credential.ssid().to_string(),
        });
        self.state = LinkState::Connecting;
        Ok(())
    }

    /// Check whether the pending join has completed.
    ///
    /// Returns `true` once associated (the state becomes `Connected`).
    pub fn poll_join(&mut self) -> bool {
        if self.joining.is_none() {
            return matches!(self.state, LinkState::Connected { .. });
        }
        if !self.driver.is_associated() {
            return false;
        }

        let ssid = self.joining.take().map(|j| j.ssid).unwrap_or_default();
        let address = self.driver.client_address().unwrap_or(Ipv4Addr::UNSPECIFIED);
        info!("Joined '{}', address {}", ssid, address);
        self.state = LinkState::Connected { ssid, address };
        true
    }

    /// Give up on the pending join.
    pub fn abandon_join(&mut self) {
        if let Some(join) = self.joining.take() {
            warn!("Giving up on '{}'", join.ssid);
            if let Err(e) = self.driver.disconnect() {
                debug!("Disconnect after failed join: {}", e);
            }
            self.state = self.idle_state();
        }
    }

    /// Join as a client, waiting at most `timeout`.
    ///
    /// Polls every poll interval until associated or the deadline passes, so
    /// it returns within `timeout` plus one poll interval. A timeout is a
    /// normal outcome and yields `false`.
    pub fn join_as_client<P: Platform>(
        &mut self,
        platform: &P,
        credential: &Credential,
        timeout: Duration,
    ) -> bool {
        if let Err(e) = self.begin_join(credential) {
            warn!("Join request for '{}' failed: {}", credential.ssid(), e);
            return false;
        }

        let deadline = platform.now() + timeout;
        loop {
            if self.poll_join() {
                return true;
            }
            let now = platform.now();
            if now >= deadline {
                warn!(
                    "Join '{}' timed out after {} ms",
                    credential.ssid(),
                    timeout.as_millis()
                );
                self.abandon_join();
                return false;
            }
            platform.sleep(self.poll_interval.min(remaining(deadline, now)));
        }
    }

    /// Bring up the access point.
    pub fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), LinkError> {
        config.validate()?;
        self.driver.start_access_point(config)?;
        self.ap_active = true;
        if matches!(self.state, LinkState::Disconnected) {
            self.state = LinkState::ApActive;
        }
        info!(
            "Access point '{}' up at {}/{}",
            config.ssid, config.address, config.prefix_len
        );
        Ok(())
    }

    /// Tear down the access point and return to client-only mode.
    pub fn stop_access_point(&mut self) -> Result<(), LinkError> {
        if !self.ap_active {
            return Ok(());
        }
        self.driver.stop_access_point()?;
        self.ap_active = false;
        if matches!(self.state, LinkState::ApActive) {
            self.state = LinkState::Disconnected;
        }
        info!("Access point down");
        Ok(())
    }

    /// Register a local hostname (best effort).
    pub fn register_hostname(&mut self, hostname: &str, http_port: u16) -> Result<(), LinkError> {
        self.driver.register_hostname(hostname, http_port)
    }

    /// Last 16 bits of the hardware address as four uppercase hex digits.
    pub fn device_suffix(&self) -> String {
        let mac = self.driver.mac_address();
        format!("{:02X}{:02X}", mac[4], mac[5])
    }

    /// Borrow the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutably borrow the driver.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn idle_state(&self) -> LinkState {
        if self.ap_active {
            LinkState::ApActive
        } else {
            LinkState::Disconnected
        }
    }
}

impl<D: LinkDriver> LinkView for LinkController<D> {
    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        LinkController::scan(self)
    }

    fn state(&self) -> LinkState {
        self.current_state()
    }
}

fn remaining(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

/// Errors that can occur during radio operations.
#[derive(Debug)]
pub enum LinkError {
    /// SSID is invalid (empty, too long or not representable).
    InvalidSsid,
    /// Password is invalid for the requested mode.
    InvalidPassword,
    /// Scan could not be performed.
    ScanFailed(String),
    /// The driver rejected a mode or configuration change.
    Driver(String),
    /// Operation not available on this platform.
    Unsupported,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::ScanFailed(msg) => write!(f, "scan failed: {}", msg),
            Self::Driver(msg) => write!(f, "driver error: {}", msg),
            Self::Unsupported => write!(f, "not supported on this platform"),
        }
    }
}

impl std::error::Error for LinkError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for LinkError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::Driver(format!("{:?}", e))
    }
}
