//! Clock, yield and restart hooks.
//!
//! Every deadline in the crate is measured against [`Platform::now`], so the
//! state machine can be driven by a manual clock in tests and by the real
//! monotonic clock on the device.

use std::time::{Duration, Instant};

/// Platform services the provisioner needs from its host.
pub trait Platform {
    /// Monotonic time.
    fn now(&self) -> Instant;

    /// Yield to the rest of the system for `duration`.
    fn sleep(&self, duration: Duration);

    /// Restart the device.
    ///
    /// On hardware this never returns. Host implementations may return.
    fn restart(&self);
}

/// Host platform: `std::time` clock, thread sleep, process exit on restart.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn restart(&self) {
        // A service manager is expected to start us again.
        log::warn!("Restart requested, exiting process");
        std::process::exit(0);
    }
}

/// ESP32 platform: FreeRTOS-backed `std` clock and `esp_restart`.
#[cfg(feature = "esp32")]
#[derive(Debug, Default, Clone, Copy)]
pub struct EspPlatform;

#[cfg(feature = "esp32")]
impl Platform for EspPlatform {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn restart(&self) {
        log::warn!("Restarting device");
        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}
