//! Provisioner configuration.
//!
//! # Components
//!
//! - [`credential`] - WiFi credential type (host-testable)
//! - [`ProvisionerConfig`] - access point, portal and timing settings
//!
//! Defaults match what a phone expects from a setup access point: a
//! WPA2-protected network at `192.168.4.1/24` with DNS on port 53 and the UI on
//! port 80.

mod credential;

use std::net::Ipv4Addr;
use std::time::Duration;

pub use credential::{
    ConfigError, Credential, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_AP_PASSWORD_LEN,
};

/// Default access point name prefix. The device suffix is appended to it.
pub const DEFAULT_AP_PREFIX: &str = "Provisioner-Setup";

/// Default access point password (iOS refuses shorter WPA2 keys).
pub const DEFAULT_AP_PASSWORD: &str = "setup1234";

/// Default gateway address of the setup access point.
pub const DEFAULT_AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Default hostname registered over mDNS while the portal runs.
pub const DEFAULT_HOSTNAME: &str = "wifi-provisioner";

/// Boot-time join timeout for stored credentials.
pub const BOOT_JOIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Join timeout for credentials submitted through the portal.
pub const SUBMITTED_JOIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between association checks during a join.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Yield between iterations of `block_until_provisioned`.
pub const BLOCK_YIELD: Duration = Duration::from_millis(5);

/// Provisioner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Access point name prefix (`<prefix>-<suffix>`).
    pub ap_prefix: String,
    /// Access point WPA2 password (8-64 bytes).
    pub ap_password: String,
    /// Fixed gateway address of the access point.
    pub ap_address: Ipv4Addr,
    /// Subnet prefix length of the access point network.
    pub ap_prefix_len: u8,
    /// Local address the DNS and HTTP listeners bind to.
    pub listen_address: Ipv4Addr,
    /// UDP port of the DNS hijack responder.
    pub dns_port: u16,
    /// TCP port of the portal web server.
    pub http_port: u16,
    /// Hostname registered over mDNS (best effort).
    pub hostname: String,
    /// Join timeout used by `ensure_connected` when none is given.
    pub boot_join_timeout: Duration,
    /// Join timeout for credentials submitted through the portal.
    pub submitted_join_timeout: Duration,
    /// Interval between association checks.
    pub join_poll_interval: Duration,
    /// Yield between iterations of the blocking helper.
    pub block_yield: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            ap_prefix: DEFAULT_AP_PREFIX.to_string(),
            ap_password: DEFAULT_AP_PASSWORD.to_string(),
            ap_address: DEFAULT_AP_ADDRESS,
            ap_prefix_len: 24,
            listen_address: Ipv4Addr::UNSPECIFIED,
            dns_port: 53,
            http_port: 80,
            hostname: DEFAULT_HOSTNAME.to_string(),
            boot_join_timeout: BOOT_JOIN_TIMEOUT,
            submitted_join_timeout: SUBMITTED_JOIN_TIMEOUT,
            join_poll_interval: JOIN_POLL_INTERVAL,
            block_yield: BLOCK_YIELD,
        }
    }
}

impl ProvisionerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ap_prefix.is_empty() {
            return Err(ConfigError::PrefixEmpty);
        }
        // "-XXXX" is appended to the prefix.
        let ap_name_len = self.ap_prefix.len() + 5;
        if ap_name_len > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: ap_name_len,
                max: MAX_SSID_LEN,
            });
        }
        if self.ap_password.len() < MIN_AP_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len: self.ap_password.len(),
                min: MIN_AP_PASSWORD_LEN,
            });
        }
        if self.ap_password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.ap_password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        if self.ap_prefix_len > 30 {
            return Err(ConfigError::InvalidValue {
                key: "ap_prefix_len".into(),
                value: self.ap_prefix_len.to_string(),
            });
        }
        Ok(())
    }

    /// Overlay `PROVISIONER_*` environment variables onto the defaults.
    ///
    /// Recognised: `PROVISIONER_AP_PREFIX`, `PROVISIONER_AP_PASSWORD`,
    /// `PROVISIONER_AP_ADDRESS`, `PROVISIONER_LISTEN_ADDRESS`, `PROVISIONER_DNS_PORT`,
    /// `PROVISIONER_HTTP_PORT`, `PROVISIONER_HOSTNAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(prefix) = lookup("PROVISIONER_AP_PREFIX") {
            config.ap_prefix = prefix;
        }
        if let Some(password) = lookup("PROVISIONER_AP_PASSWORD") {
            config.ap_password = password;
        }
        if let Some(address) = lookup("PROVISIONER_AP_ADDRESS") {
            config.ap_address = parse_value("PROVISIONER_AP_ADDRESS", &address)?;
        }
        if let Some(address) = lookup("PROVISIONER_LISTEN_ADDRESS") {
            config.listen_address = parse_value("PROVISIONER_LISTEN_ADDRESS", &address)?;
        }
        if let Some(port) = lookup("PROVISIONER_DNS_PORT") {
            config.dns_port = parse_value("PROVISIONER_DNS_PORT", &port)?;
        }
        if let Some(port) = lookup("PROVISIONER_HTTP_PORT") {
            config.http_port = parse_value("PROVISIONER_HTTP_PORT", &port)?;
        }
        if let Some(hostname) = lookup("PROVISIONER_HOSTNAME") {
            config.hostname = hostname;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ProvisionerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ap_address, Ipv4Addr::new(192, 168, 4, 1));
        assert_eq!(config.ap_prefix_len, 24);
        assert_eq!(config.submitted_join_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_short_ap_password_rejected() {
        let config = ProvisionerConfig {
            ap_password: "short".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PasswordTooShort { len: 5, min: 8 })
        ));
    }

    #[test]
    fn test_long_prefix_rejected() {
        let config = ProvisionerConfig {
            ap_prefix: "a".repeat(28),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SsidTooLong { len: 33, .. })
        ));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = ProvisionerConfig {
            ap_prefix: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::PrefixEmpty));
    }

    #[test]
    fn test_env_overrides() {
        let config = ProvisionerConfig::from_lookup(lookup_from(&[
            ("PROVISIONER_AP_PREFIX", "Kiosk"),
            ("PROVISIONER_HTTP_PORT", "8080"),
            ("PROVISIONER_DNS_PORT", " 5353 "),
            ("PROVISIONER_AP_ADDRESS", "10.0.0.1"),
        ]))
        .unwrap();
        assert_eq!(config.ap_prefix, "Kiosk");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.dns_port, 5353);
        assert_eq!(config.ap_address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
    }

    #[test]
    fn test_env_invalid_port() {
        let result = ProvisionerConfig::from_lookup(lookup_from(&[(
            "PROVISIONER_HTTP_PORT",
            "eighty",
        )]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
