//! WiFi provisioner ESP32 firmware binary.
//!
//! Joins the stored network or runs the setup portal until a phone provides
//! credentials, then keeps the connection under watch.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use log::{error, info};
    use std::time::Duration;
    use wifi_provisioner::{
        EspLinkDriver, EspPlatform, NvsCredentialStore, Platform, ProvisionerConfig, Provisioner,
    };

    esp_idf_svc::log::EspLogger::initialize_default();

    info!("=== WiFi provisioner starting ===");

    let peripherals = match Peripherals::take() {
        Ok(p) => p,
        Err(e) => {
            error!("Peripherals unavailable: {:?}", e);
            return;
        }
    };
    let sysloop = match EspSystemEventLoop::take() {
        Ok(s) => s,
        Err(e) => {
            error!("System event loop unavailable: {:?}", e);
            return;
        }
    };

    let store = match NvsCredentialStore::take_default() {
        Ok(store) => store,
        Err(e) => {
            error!("NVS unavailable: {:?}", e);
            return;
        }
    };
    let driver = match EspLinkDriver::new(peripherals.modem, sysloop) {
        Ok(driver) => driver,
        Err(e) => {
            error!("WiFi driver init failed: {}", e);
            return;
        }
    };

    let config = ProvisionerConfig::default();
    let boot_timeout = config.boot_join_timeout;
    let mut provisioner = match Provisioner::new(config, store, driver, EspPlatform) {
        Ok(p) => p,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    if !provisioner.ensure_connected(boot_timeout) {
        info!(
            "Setup portal up as '{}'",
            provisioner.ap_name().unwrap_or("?")
        );
        provisioner.block_until_provisioned(None);
    }
    info!("Network ready: {}", provisioner.link_state());

    // Application work goes here; pump keeps the link under watch.
    loop {
        if !provisioner.pump() {
            provisioner.ensure_connected(boot_timeout);
        }
        EspPlatform.sleep(Duration::from_millis(100));
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-provisioner' to try the portal on this machine.");
}
