//! Host-based provisioner for development.
//!
//! Runs the full setup flow on a workstation against a simulated radio: the
//! captive portal is served on the local machine and submitted credentials are
//! saved to `~/.wifi-provisioner/credentials.json`.
//!
//! # Usage
//!
//! ```bash
//! PROVISIONER_SIM_NETWORKS="HomeNet:secret123:-45,CafeGuest::-70" \
//!     cargo run --bin host-provisioner
//! ```
//!
//! Then open http://localhost:8080/. Ports default to 8080 (HTTP) and 5353
//! (DNS) so no privileges are needed; `PROVISIONER_HTTP_PORT` and
//! `PROVISIONER_DNS_PORT` override them.

use log::{error, info, warn};
use std::time::Duration;
use wifi_provisioner::{
    CredentialStore, FileCredentialStore, HostPlatform, ProvisionerConfig, Provisioner,
    SimulatedDriver,
};

const HOST_HTTP_PORT: u16 = 8080;
const HOST_DNS_PORT: u16 = 5353;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== WiFi provisioner (host) starting ===");

    let mut config = match ProvisionerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if std::env::var_os("PROVISIONER_HTTP_PORT").is_none() {
        config.http_port = HOST_HTTP_PORT;
    }
    if std::env::var_os("PROVISIONER_DNS_PORT").is_none() {
        config.dns_port = HOST_DNS_PORT;
    }

    let networks = std::env::var("PROVISIONER_SIM_NETWORKS").unwrap_or_default();
    if networks.is_empty() {
        warn!("PROVISIONER_SIM_NETWORKS not set, no network will be reachable");
    }
    let driver = SimulatedDriver::from_spec(&networks);

    let store = match FileCredentialStore::open_default() {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot locate credentials file: {}", e);
            std::process::exit(1);
        }
    };
    info!("Credentials file: {}", store.path().display());
    if let Some(stored) = store.load() {
        info!("Stored network: '{}'", stored.ssid());
    }

    let boot_timeout = config.boot_join_timeout;
    let http_port = config.http_port;
    let mut provisioner = match Provisioner::new(config, store, driver, HostPlatform) {
        Ok(p) => p,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if !provisioner.ensure_connected(boot_timeout) {
        if provisioner.is_portal_active() {
            info!(
                "Portal '{}' ready at http://localhost:{}/",
                provisioner.ap_name().unwrap_or("?"),
                http_port
            );
        }
        if !provisioner.block_until_provisioned(None) {
            error!("Provisioning abandoned");
            std::process::exit(1);
        }
    }

    info!("Provisioned: {}", provisioner.link_state());
    info!("Entering main loop (Ctrl+C to exit)...");
    loop {
        std::thread::sleep(Duration::from_secs(5));
        if !provisioner.pump() {
            warn!("Connection lost, reprovisioning");
            provisioner.block_until_provisioned(None);
        }
    }
}
