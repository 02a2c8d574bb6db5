//! WiFi configuration utility for ESP32.
//!
//! Stores WiFi credentials to NVS so the provisioner joins without the setup
//! portal.
//!
//! Usage:
//!   WIFI_SSID="MyNetwork" WIFI_PASSWORD="secret" cargo run --bin configure-wifi --features esp32
//!
//! For open networks (no password):
//!   WIFI_SSID="OpenNetwork" WIFI_PASSWORD="" cargo run --bin configure-wifi --features esp32
//!
//! After running this once, the ESP32 will remember the credentials across reboots.

/// WiFi SSID - set via WIFI_SSID environment variable at compile time.
#[cfg(feature = "esp32")]
const WIFI_SSID: Option<&str> = option_env!("WIFI_SSID");

/// WiFi password - set via WIFI_PASSWORD environment variable at compile time.
/// Empty string for open networks.
#[cfg(feature = "esp32")]
const WIFI_PASSWORD: Option<&str> = option_env!("WIFI_PASSWORD");

/// Print the message, give the serial console a moment, and exit.
#[cfg(feature = "esp32")]
fn halt_with_error(msg: &str) -> ! {
    eprintln!("\n{}", msg);
    eprintln!("\n=== Configuration failed ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
    std::process::exit(1);
}

#[cfg(feature = "esp32")]
fn main() {
    use wifi_provisioner::{Credential, CredentialStore, NvsCredentialStore};

    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    println!("\n=== WiFi Configuration Utility ===\n");

    let ssid = match WIFI_SSID {
        Some(s) if !s.is_empty() => s,
        _ => {
            halt_with_error(
                "Error: WIFI_SSID environment variable not set at compile time.\n\n\
                 Usage:\n  \
                 WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo run --bin configure-wifi --features esp32",
            );
        }
    };
    let password = WIFI_PASSWORD.unwrap_or("");

    println!("SSID: {}", ssid);
    println!(
        "Password: {} ({} bytes)",
        if password.is_empty() { "(none)" } else { "****" },
        password.len()
    );

    let credential = match Credential::new(ssid, password) {
        Ok(credential) => credential,
        Err(e) => halt_with_error(&format!("Error: {}", e)),
    };

    let mut store = match NvsCredentialStore::take_default() {
        Ok(store) => store,
        Err(e) => halt_with_error(&format!("Error initializing NVS: {:?}", e)),
    };
    if let Err(e) = store.save(&credential) {
        halt_with_error(&format!("Error saving to NVS: {}", e));
    }

    match store.load() {
        Some(stored) if stored == credential => {
            println!("\n=== WiFi configuration saved to NVS ===");
        }
        _ => halt_with_error("Error: read-back does not match what was written"),
    }

    println!("\n=== Done - you can disconnect the device ===\n");
    std::thread::sleep(std::time::Duration::from_secs(2));
}

#[cfg(not(feature = "esp32"))]
fn main() {
    eprintln!("This binary must be built for ESP32.");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  WIFI_SSID=\"MyNetwork\" WIFI_PASSWORD=\"secret\" cargo run --bin configure-wifi --features esp32");
    std::process::exit(1);
}
