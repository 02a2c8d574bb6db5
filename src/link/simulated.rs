//! Simulated radio driver.
//!
//! On host systems there is no WiFi radio to drive. This driver plays one:
//! it knows a fixed set of reachable networks, accepts a join when the secret
//! matches, and reports association after a configurable number of polls.

use super::{AccessPointConfig, LinkDriver, LinkError, ScannedNetwork};
use crate::config::Credential;
use log::{debug, info};
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
struct SimulatedNetwork {
    ssid: String,
    password: String,
    rssi: i8,
}

/// Scripted radio for host runs and tests.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    networks: Vec<SimulatedNetwork>,
    mac: [u8; 6],
    association_polls: u32,
    fail_scan: bool,
    hostname_ok: bool,
    // Join in progress: (will succeed, polls so far).
    join: Option<(bool, u32)>,
    associated: bool,
    ap: Option<AccessPointConfig>,
    joins: u32,
    disconnects: u32,
    ap_starts: u32,
    ap_stops: u32,
    scans: u32,
}

impl SimulatedDriver {
    /// Address handed out to the simulated client interface.
    pub const CLIENT_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 42);

    /// Create a driver with no reachable networks.
    pub fn new() -> Self {
        Self {
            networks: Vec::new(),
            mac: [0x02, 0x00, 0x00, 0x00, 0x12, 0x34],
            association_polls: 1,
            fail_scan: false,
            hostname_ok: true,
            join: None,
            associated: false,
            ap: None,
            joins: 0,
            disconnects: 0,
            ap_starts: 0,
            ap_stops: 0,
            scans: 0,
        }
    }

    /// Add a reachable network.
    pub fn with_network(mut self, ssid: &str, password: &str, rssi: i8) -> Self {
        self.networks.push(SimulatedNetwork {
            ssid: ssid.to_string(),
            password: password.to_string(),
            rssi,
        });
        self
    }

    /// Set the hardware address.
    pub fn with_mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = mac;
        self
    }

    /// Number of `is_associated` polls before a good join completes (min 1).
    pub fn with_association_polls(mut self, polls: u32) -> Self {
        self.association_polls = polls.max(1);
        self
    }

    /// Make every scan fail.
    pub fn with_failing_scan(mut self) -> Self {
        self.fail_scan = true;
        self
    }

    /// Make hostname registration fail.
    pub fn with_failing_hostname(mut self) -> Self {
        self.hostname_ok = false;
        self
    }

    /// Parse `ssid:password:rssi` entries separated by commas.
    ///
    /// Password and RSSI are optional: `HomeNet:secret123:-45,CafeGuest`.
    pub fn from_spec(spec: &str) -> Self {
        spec.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .fold(Self::new(), |driver, entry| {
                let mut parts = entry.splitn(3, ':');
                let ssid = parts.next().unwrap_or_default();
                let password = parts.next().unwrap_or_default();
                let rssi = parts.next().and_then(|r| r.parse().ok()).unwrap_or(-60);
                driver.with_network(ssid, password, rssi)
            })
    }

    /// Simulate the remote network going away.
    pub fn drop_association(&mut self) {
        self.associated = false;
    }

    /// Whether the access point is up.
    pub fn ap_active(&self) -> bool {
        self.ap.is_some()
    }

    /// Name of the running access point.
    pub fn ap_ssid(&self) -> Option<&str> {
        self.ap.as_ref().map(|ap| ap.ssid.as_str())
    }

    /// Number of join requests.
    pub fn joins(&self) -> u32 {
        self.joins
    }

    /// Number of disconnects.
    pub fn disconnects(&self) -> u32 {
        self.disconnects
    }

    /// Number of access point starts.
    pub fn ap_starts(&self) -> u32 {
        self.ap_starts
    }

    /// Number of access point stops.
    pub fn ap_stops(&self) -> u32 {
        self.ap_stops
    }

    /// Number of scans.
    pub fn scans(&self) -> u32 {
        self.scans
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkDriver for SimulatedDriver {
    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        self.scans += 1;
        if self.fail_scan {
            return Err(LinkError::ScanFailed("simulated failure".into()));
        }
        Ok(self
            .networks
            .iter()
            .map(|n| ScannedNetwork {
                ssid: n.ssid.clone(),
                rssi: n.rssi,
            })
            .collect())
    }

    fn begin_join(&mut self, credential: &Credential) -> Result<(), LinkError> {
        self.joins += 1;
        self.associated = false;
        let reachable = self
            .networks
            .iter()
            .any(|n| n.ssid == credential.ssid() && n.password == credential.password());
        debug!(
            "Simulated join '{}' (dual mode: {}, will succeed: {})",
            credential.ssid(),
            self.ap.is_some(),
            reachable
        );
        self.join = Some((reachable, 0));
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        if let Some((reachable, polls)) = self.join.as_mut() {
            *polls += 1;
            if *reachable && *polls >= self.association_polls {
                self.join = None;
                self.associated = true;
            }
        }
        self.associated
    }

    fn client_address(&self) -> Option<Ipv4Addr> {
        self.associated.then_some(Self::CLIENT_ADDRESS)
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.disconnects += 1;
        self.join = None;
        self.associated = false;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), LinkError> {
        self.ap_starts += 1;
        info!("Simulated access point '{}' up", config.ssid);
        self.ap = Some(config.clone());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), LinkError> {
        self.ap_stops += 1;
        self.ap = None;
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn register_hostname(&mut self, hostname: &str, _http_port: u16) -> Result<(), LinkError> {
        if self.hostname_ok {
            debug!("Simulated mDNS name '{}.local'", hostname);
            Ok(())
        } else {
            Err(LinkError::Unsupported)
        }
    }
}
