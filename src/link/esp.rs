//! ESP-IDF WiFi driver.
//!
//! Wraps `EspWifi` with a station netif and a router-mode access point netif,
//! so the setup access point and a client join can run at the same time
//! (mixed mode). All calls except [`LinkDriver::scan`] are non-blocking.

use super::{AccessPointConfig, LinkDriver, LinkError, ScannedNetwork};
use crate::config::Credential;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::ipv4::{self, Mask, RouterConfiguration, Subnet};
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::netif::{EspNetif, NetifConfiguration, NetifStack};
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiDriver,
};
use log::{debug, info, warn};
use std::net::Ipv4Addr;

/// Channel used by the setup access point.
const AP_CHANNEL: u8 = 1;

/// Stations allowed on the setup access point.
const AP_MAX_CONNECTIONS: u16 = 4;

/// ESP-IDF radio driver.
pub struct EspLinkDriver {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    ap: Option<AccessPointConfiguration>,
    ap_address: Option<(Ipv4Addr, u8)>,
    mdns: Option<EspMdns>,
}

impl EspLinkDriver {
    /// Create the driver. The radio stays stopped until first use.
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, LinkError> {
        let driver = WifiDriver::new(modem, sysloop, None)?;
        let sta_netif = EspNetif::new(NetifStack::Sta)?;
        let ap_netif = EspNetif::new(NetifStack::Ap)?;
        let wifi = EspWifi::wrap_all(driver, sta_netif, ap_netif)?;

        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            ap: None,
            ap_address: None,
            mdns: None,
        })
    }

    fn configuration(&self) -> Configuration {
        match &self.ap {
            Some(ap) => Configuration::Mixed(self.client.clone(), ap.clone()),
            None => Configuration::Client(self.client.clone()),
        }
    }

    fn apply(&mut self) -> Result<(), LinkError> {
        let config = self.configuration();
        self.wifi.set_configuration(&config)?;
        if !self.wifi.is_started()? {
            self.wifi.start()?;
        }
        Ok(())
    }

    /// Replace the AP netif if the requested gateway differs from the current one.
    fn ensure_ap_netif(&mut self, address: Ipv4Addr, prefix_len: u8) -> Result<(), LinkError> {
        if self.ap_address == Some((address, prefix_len)) {
            return Ok(());
        }

        let netif_config = NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: address,
                    mask: Mask(prefix_len),
                },
                dhcp_enabled: true,
                dns: Some(address),
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        };
        let netif = EspNetif::new_with_conf(&netif_config)?;
        self.wifi.swap_netif_ap(netif)?;
        self.ap_address = Some((address, prefix_len));
        Ok(())
    }
}

impl LinkDriver for EspLinkDriver {
    fn scan(&mut self) -> Result<Vec<ScannedNetwork>, LinkError> {
        self.apply()?;
        let found = self
            .wifi
            .scan()
            .map_err(|e| LinkError::ScanFailed(format!("{:?}", e)))?;

        Ok(found
            .into_iter()
            .map(|ap| ScannedNetwork {
                ssid: ap.ssid.as_str().to_string(),
                rssi: ap.signal_strength,
            })
            .collect())
    }

    fn begin_join(&mut self, credential: &Credential) -> Result<(), LinkError> {
        let auth_method = if credential.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        self.client = ClientConfiguration {
            ssid: credential
                .ssid()
                .try_into()
                .map_err(|_| LinkError::InvalidSsid)?,
            password: credential
                .password()
                .try_into()
                .map_err(|_| LinkError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        };

        if self.wifi.is_connected().unwrap_or(false) {
            let _ = self.wifi.disconnect();
        }
        self.apply()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn client_address(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        self.wifi.disconnect()?;
        Ok(())
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), LinkError> {
        self.ensure_ap_netif(config.address, config.prefix_len)?;

        self.ap = Some(AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| LinkError::InvalidPassword)?,
            channel: AP_CHANNEL,
            auth_method: AuthMethod::WPA2Personal,
            max_connections: AP_MAX_CONNECTIONS,
            ..Default::default()
        });

        if let Err(e) = self.apply() {
            self.ap = None;
            return Err(e);
        }
        info!("Radio in mixed mode, AP '{}'", config.ssid);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), LinkError> {
        self.ap = None;
        // mDNS only made sense on the setup network.
        self.mdns = None;
        self.apply()?;
        info!("Radio in client mode");
        Ok(())
    }

    fn mac_address(&self) -> [u8; 6] {
        self.wifi.sta_netif().get_mac().unwrap_or_else(|e| {
            warn!("Failed to read MAC address: {:?}", e);
            [0; 6]
        })
    }

    fn register_hostname(&mut self, hostname: &str, http_port: u16) -> Result<(), LinkError> {
        self.mdns = None;
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(hostname)?;
        mdns.add_service(None, "_http", "_tcp", http_port, &[])?;
        debug!("mDNS: {}.local advertises _http._tcp:{}", hostname, http_port);
        self.mdns = Some(mdns);
        Ok(())
    }
}
