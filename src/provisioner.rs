//! Provisioning state machine.
//!
//! [`Provisioner`] owns the credential store, the link and the captive portal
//! and drives them through:
//!
//! ```text
//! Idle -> TryingStored -> Connected
//!              |
//!              v
//!         PortalActive <-> TryingSubmitted -> Connected
//! ```
//!
//! The stored-credential join at boot blocks for at most its timeout. The join
//! for credentials submitted through the portal is started without blocking
//! and checked against its deadline on every [`Provisioner::pump`], so the
//! portal keeps answering while the radio associates.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use wifi_provisioner::config::{Credential, ProvisionerConfig};
//! use wifi_provisioner::link::SimulatedDriver;
//! use wifi_provisioner::platform::HostPlatform;
//! use wifi_provisioner::store::MemoryCredentialStore;
//! use wifi_provisioner::Provisioner;
//!
//! let store = MemoryCredentialStore::with_credential(Credential::new("HomeNet", "secret123").unwrap());
//! let driver = SimulatedDriver::new().with_network("HomeNet", "secret123", -50);
//! let mut provisioner =
//!     Provisioner::new(ProvisionerConfig::default(), store, driver, HostPlatform).unwrap();
//!
//! assert!(provisioner.ensure_connected(Duration::from_secs(1)));
//! assert!(!provisioner.is_portal_active());
//! ```

use crate::config::{ConfigError, Credential, ProvisionerConfig, MAX_SSID_LEN};
use crate::link::{LinkController, LinkDriver, LinkState};
use crate::platform::Platform;
use crate::portal::CaptivePortal;
use crate::store::CredentialStore;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// Pause between erasing credentials and restarting, so the log line and the
/// storage commit get out.
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Idle,
    TryingStored,
    PortalActive,
    TryingSubmitted,
    Connected,
}

/// A submitted-credential join waiting on its deadline.
#[derive(Debug)]
struct JoinAttempt {
    ssid: String,
    deadline: Instant,
}

/// Drives a device from "no network" to "joined".
pub struct Provisioner<S: CredentialStore, D: LinkDriver, P: Platform> {
    config: ProvisionerConfig,
    store: S,
    link: LinkController<D>,
    portal: CaptivePortal,
    platform: P,
    state: ProvisionState,
    ap_prefix: String,
    attempt: Option<JoinAttempt>,
    #[cfg(test)]
    history: Vec<ProvisionState>,
}

impl<S: CredentialStore, D: LinkDriver, P: Platform> Provisioner<S, D, P> {
    /// Build a provisioner. Nothing touches the radio until
    /// [`ensure_connected`](Self::ensure_connected).
    pub fn new(
        config: ProvisionerConfig,
        store: S,
        driver: D,
        platform: P,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            link: LinkController::new(driver, config.join_poll_interval),
            portal: CaptivePortal::new(&config),
            ap_prefix: config.ap_prefix.clone(),
            config,
            store,
            platform,
            state: ProvisionState::Idle,
            attempt: None,
            #[cfg(test)]
            history: vec![ProvisionState::Idle],
        })
    }

    /// Set the access point name prefix.
    ///
    /// An unusable prefix is logged and the configured one kept.
    pub fn begin(&mut self, ap_prefix: &str) {
        if ap_prefix.is_empty() || ap_prefix.len() + 5 > MAX_SSID_LEN {
            warn!(
                "Ignoring access point prefix '{}', keeping '{}'",
                ap_prefix, self.ap_prefix
            );
            return;
        }
        self.ap_prefix = ap_prefix.to_string();
        debug!("Access point prefix '{}'", self.ap_prefix);
    }

    /// Join with stored credentials, or fall back to the setup portal.
    ///
    /// Returns `true` when connected. Returns `false` once the portal is up
    /// (or could not be brought up); the caller then keeps calling
    /// [`pump`](Self::pump) or switches to
    /// [`block_until_provisioned`](Self::block_until_provisioned).
    pub fn ensure_connected(&mut self, timeout: Duration) -> bool {
        match self.state {
            ProvisionState::Connected => return self.check_connection(),
            ProvisionState::PortalActive | ProvisionState::TryingSubmitted => return false,
            ProvisionState::Idle | ProvisionState::TryingStored => {}
        }

        self.set_state(ProvisionState::TryingStored);
        match self.store.load() {
            Some(credential) => {
                if self
                    .link
                    .join_as_client(&self.platform, &credential, timeout)
                {
                    self.set_state(ProvisionState::Connected);
                    return true;
                }
                warn!("Stored network '{}' unreachable", credential.ssid());
            }
            None => info!("No stored credentials"),
        }

        self.open_portal();
        false
    }

    /// Service the portal and any join in flight. Call every loop iteration.
    ///
    /// Returns whether the device is connected.
    pub fn pump(&mut self) -> bool {
        match self.state {
            ProvisionState::PortalActive => {
                self.portal.pump(&mut self.link);
                if let Some(credential) = self.portal.take_pending_submission() {
                    self.start_attempt(credential);
                }
            }
            ProvisionState::TryingSubmitted => {
                self.portal.pump(&mut self.link);
                self.poll_attempt();
            }
            ProvisionState::Connected => {
                self.check_connection();
            }
            ProvisionState::Idle | ProvisionState::TryingStored => {}
        }
        self.state == ProvisionState::Connected
    }

    /// Run [`ensure_connected`](Self::ensure_connected) and [`pump`](Self::pump)
    /// until connected or `max_wait` has passed.
    ///
    /// Yields to the platform between iterations.
    pub fn block_until_provisioned(&mut self, max_wait: Option<Duration>) -> bool {
        let deadline = max_wait.map(|wait| self.platform.now() + wait);
        loop {
            if self.state == ProvisionState::Idle
                && self.ensure_connected(self.config.boot_join_timeout)
            {
                return true;
            }
            if self.pump() {
                return true;
            }
            if deadline.is_some_and(|d| self.platform.now() >= d) {
                warn!("Still not provisioned after waiting, giving up");
                return false;
            }
            self.platform.sleep(self.config.block_yield);
        }
    }

    /// Erase stored credentials and restart the device.
    pub fn forget_and_restart(&mut self) {
        warn!("Forgetting stored credentials and restarting");
        if let Err(e) = self.store.erase() {
            error!("Failed to erase credentials: {}", e);
        }
        self.portal.stop(&mut self.link);
        self.platform.sleep(RESTART_DELAY);
        self.platform.restart();
    }

    /// Whether the setup portal is running.
    pub fn is_portal_active(&self) -> bool {
        self.portal.is_running()
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        self.link.current_state()
    }

    /// Name of the setup access point while the portal runs.
    pub fn ap_name(&self) -> Option<&str> {
        self.portal.ap_name()
    }

    pub fn link(&self) -> &LinkController<D> {
        &self.link
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn portal(&self) -> &CaptivePortal {
        &self.portal
    }

    fn open_portal(&mut self) {
        let ap_name = format!("{}-{}", self.ap_prefix, self.link.device_suffix());
        match self.portal.start(&mut self.link, &ap_name) {
            Ok(()) => self.set_state(ProvisionState::PortalActive),
            Err(e) => {
                error!("Failed to start setup portal: {}", e);
                self.set_state(ProvisionState::Idle);
            }
        }
    }

    fn start_attempt(&mut self, credential: Credential) {
        self.set_state(ProvisionState::TryingSubmitted);

        // Persist first: the user typed it, keep it even if this join fails.
        if let Err(e) = self.store.save(&credential) {
            error!("Failed to save credentials for '{}': {}", credential.ssid(), e);
        }

        if let Err(e) = self.link.begin_join(&credential) {
            warn!("Join request for '{}' failed: {}", credential.ssid(), e);
            self.set_state(ProvisionState::PortalActive);
            return;
        }
        self.attempt = Some(JoinAttempt {
            ssid: credential.ssid().to_string(),
            deadline: self.platform.now() + self.config.submitted_join_timeout,
        });
    }

    fn poll_attempt(&mut self) {
        let Some(attempt) = self.attempt.as_ref() else {
            self.set_state(ProvisionState::PortalActive);
            return;
        };

        if self.link.poll_join() {
            info!("Provisioned onto '{}'", attempt.ssid);
            self.attempt = None;
            self.portal.stop(&mut self.link);
            self.set_state(ProvisionState::Connected);
        } else if self.platform.now() >= attempt.deadline {
            warn!(
                "Could not join '{}' within {} s, portal stays up",
                attempt.ssid,
                self.config.submitted_join_timeout.as_secs()
            );
            self.attempt = None;
            self.link.abandon_join();
            self.set_state(ProvisionState::PortalActive);
        }
    }

    /// In `Connected`, notice a dropped association and go back to `Idle`.
    fn check_connection(&mut self) -> bool {
        if self.link.is_connected() {
            return true;
        }
        self.set_state(ProvisionState::Idle);
        false
    }

    fn set_state(&mut self, next: ProvisionState) {
        if self.state != next {
            info!("Provisioning {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        #[cfg(test)]
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimulatedDriver;
    use crate::platform::manual::ManualPlatform;
    use crate::store::MemoryCredentialStore;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpStream};

    type TestProvisioner<'a> =
        Provisioner<MemoryCredentialStore, SimulatedDriver, &'a ManualPlatform>;

    fn config() -> ProvisionerConfig {
        ProvisionerConfig {
            listen_address: Ipv4Addr::LOCALHOST,
            dns_port: 0,
            http_port: 0,
            ..Default::default()
        }
    }

    fn driver() -> SimulatedDriver {
        SimulatedDriver::new()
            .with_network("HomeNet", "secret123", -45)
            .with_network("CafeGuest", "", -70)
            .with_mac([0x24, 0x0A, 0xC4, 0x11, 0xBE, 0xEF])
    }

    fn provisioner(store: MemoryCredentialStore, clock: &ManualPlatform) -> TestProvisioner<'_> {
        Provisioner::new(config(), store, driver(), clock).unwrap()
    }

    /// POST a form to the running portal, pumping until the reply arrives.
    fn submit(prov: &mut TestProvisioner<'_>, form: &str) -> String {
        let addr = prov.portal().http_addr().unwrap();
        let form = form.to_string();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            write!(
                stream,
                "POST /save HTTP/1.1\r\nHost: 192.168.4.1\r\nConnection: close\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\
                 Content-Length: {}\r\n\r\n{}",
                form.len(),
                form
            )
            .unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            reply
        });
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !client.is_finished() {
            assert!(std::time::Instant::now() < deadline, "no reply from portal");
            prov.pump();
            std::thread::sleep(Duration::from_millis(1));
        }
        client.join().unwrap()
    }

    fn pump_until(
        prov: &mut TestProvisioner<'_>,
        clock: &ManualPlatform,
        state: ProvisionState,
    ) {
        for _ in 0..1000 {
            prov.pump();
            if prov.state() == state {
                return;
            }
            clock.advance(Duration::from_millis(250));
        }
        panic!("never reached {:?}, stuck in {:?}", state, prov.state());
    }

    // ==================== Boot Tests ====================

    #[test]
    fn test_no_stored_credential_opens_portal() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);

        assert!(!prov.ensure_connected(Duration::from_secs(15)));
        assert!(prov.is_portal_active());
        assert_eq!(prov.state(), ProvisionState::PortalActive);
        assert_eq!(prov.ap_name(), Some("Provisioner-Setup-BEEF"));
        assert_eq!(prov.link().driver().joins(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_custom_prefix_and_suffix() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.begin("Kiosk");
        prov.ensure_connected(Duration::from_secs(1));

        let name = prov.ap_name().unwrap();
        let suffix = name.strip_prefix("Kiosk-").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_begin_rejects_unusable_prefix() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.begin("");
        prov.begin(&"x".repeat(30));
        prov.ensure_connected(Duration::from_secs(1));
        assert_eq!(prov.ap_name(), Some("Provisioner-Setup-BEEF"));
    }

    #[test]
    fn test_stored_credential_joins_without_portal() {
        let clock = ManualPlatform::new();
        let store =
            MemoryCredentialStore::with_credential(Credential::new("HomeNet", "secret123").unwrap());
        let mut prov = provisioner(store, &clock);

        assert!(prov.ensure_connected(Duration::from_millis(15000)));
        assert!(clock.elapsed() <= Duration::from_secs(15));
        assert!(!prov.is_portal_active());
        assert_eq!(prov.link().driver().ap_starts(), 0);
        assert_eq!(prov.state(), ProvisionState::Connected);
        assert!(matches!(
            prov.link_state(),
            LinkState::Connected { ref ssid, .. } if ssid == "HomeNet"
        ));
        assert!(prov.pump());
        assert!(prov.ensure_connected(Duration::from_secs(15)));
        assert_eq!(prov.link().driver().joins(), 1);
    }

    #[test]
    fn test_unreachable_stored_credential_falls_back_to_portal() {
        let clock = ManualPlatform::new();
        let store =
            MemoryCredentialStore::with_credential(Credential::new("HomeNet", "wrong-pass").unwrap());
        let mut prov = provisioner(store, &clock);

        assert!(!prov.ensure_connected(Duration::from_secs(15)));
        assert!(clock.elapsed() >= Duration::from_secs(15));
        assert!(clock.elapsed() <= Duration::from_millis(15250));
        assert!(prov.is_portal_active());
        assert_eq!(prov.link_state(), LinkState::ApActive);
    }

    #[test]
    fn test_ensure_connected_while_portal_active_does_not_rejoin() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(1));
        assert!(!prov.ensure_connected(Duration::from_secs(1)));
        assert_eq!(prov.link().driver().ap_starts(), 1);
    }

    #[test]
    fn test_portal_start_failure_returns_to_idle() {
        let clock = ManualPlatform::new();
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ProvisionerConfig {
            dns_port: taken.local_addr().unwrap().port(),
            ..config()
        };
        let mut prov =
            Provisioner::new(config, MemoryCredentialStore::new(), driver(), &clock).unwrap();

        assert!(!prov.ensure_connected(Duration::from_secs(1)));
        assert_eq!(prov.state(), ProvisionState::Idle);
        assert!(!prov.is_portal_active());
        assert!(!prov.link().is_ap_active());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let clock = ManualPlatform::new();
        let config = ProvisionerConfig {
            ap_password: "1234".into(),
            ..config()
        };
        assert!(Provisioner::new(config, MemoryCredentialStore::new(), driver(), &clock).is_err());
    }

    // ==================== Submission Tests ====================

    #[test]
    fn test_failed_submission_returns_to_portal() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(15));

        let reply = submit(&mut prov, "ssid=OfficeNet&pass=abc");
        assert!(reply.starts_with("HTTP/1.1 200"));
        assert_eq!(prov.state(), ProvisionState::TryingSubmitted);
        assert_eq!(prov.link_state(), LinkState::Connecting);

        let started = clock.elapsed();
        pump_until(&mut prov, &clock, ProvisionState::PortalActive);
        let waited = clock.elapsed() - started;
        assert!(waited >= Duration::from_secs(20));
        assert!(waited <= Duration::from_millis(20250));

        assert!(prov.is_portal_active());
        assert_eq!(prov.link_state(), LinkState::ApActive);
        let stored = prov.store().load().unwrap();
        assert_eq!(stored.ssid(), "OfficeNet");
        assert_eq!(stored.password(), "abc");
        assert_eq!(
            prov.history,
            vec![
                ProvisionState::Idle,
                ProvisionState::TryingStored,
                ProvisionState::PortalActive,
                ProvisionState::TryingSubmitted,
                ProvisionState::PortalActive,
            ]
        );
    }

    #[test]
    fn test_successful_submission_tears_down_portal() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(15));

        submit(&mut prov, "ssid=HomeNet&pass=secret123");
        pump_until(&mut prov, &clock, ProvisionState::Connected);

        assert!(prov.pump());
        assert!(!prov.is_portal_active());
        assert!(!prov.link().is_ap_active());
        assert_eq!(prov.link().driver().ap_stops(), 1);
        assert!(matches!(prov.link_state(), LinkState::Connected { .. }));
        assert_eq!(prov.store().saves(), 1);
    }

    #[test]
    fn test_retry_after_failed_submission() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(15));

        submit(&mut prov, "ssid=HomeNet&pass=typo");
        pump_until(&mut prov, &clock, ProvisionState::PortalActive);
        submit(&mut prov, "ssid=HomeNet&pass=secret123");
        pump_until(&mut prov, &clock, ProvisionState::Connected);

        assert_eq!(prov.store().load().unwrap().password(), "secret123");
        assert_eq!(prov.link().driver().joins(), 2);
    }

    #[test]
    fn test_submission_during_attempt_waits_its_turn() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(15));

        submit(&mut prov, "ssid=OfficeNet&pass=abc");
        submit(&mut prov, "ssid=HomeNet&pass=secret123");
        assert_eq!(prov.link().driver().joins(), 1);

        pump_until(&mut prov, &clock, ProvisionState::PortalActive);
        pump_until(&mut prov, &clock, ProvisionState::Connected);
        assert_eq!(prov.link().driver().joins(), 2);
    }

    #[test]
    fn test_failed_save_still_attempts_join() {
        let clock = ManualPlatform::new();
        let mut store = MemoryCredentialStore::new();
        store.fail_saves(true);
        let mut prov = provisioner(store, &clock);
        prov.ensure_connected(Duration::from_secs(15));

        submit(&mut prov, "ssid=HomeNet&pass=secret123");
        pump_until(&mut prov, &clock, ProvisionState::Connected);
        assert!(prov.store().load().is_none());
    }

    #[test]
    fn test_empty_submission_changes_nothing() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);
        prov.ensure_connected(Duration::from_secs(15));

        let reply = submit(&mut prov, "");
        assert!(reply.starts_with("HTTP/1.1 400"));
        assert_eq!(prov.state(), ProvisionState::PortalActive);
        assert_eq!(prov.store().saves(), 0);
        assert_eq!(prov.link().driver().joins(), 0);
    }

    // ==================== Connection Loss Tests ====================

    #[test]
    fn test_lost_association_returns_to_idle() {
        let clock = ManualPlatform::new();
        let store =
            MemoryCredentialStore::with_credential(Credential::new("HomeNet", "secret123").unwrap());
        let mut prov = provisioner(store, &clock);
        assert!(prov.ensure_connected(Duration::from_secs(15)));

        prov.link.driver_mut().drop_association();
        assert!(!prov.pump());
        assert_eq!(prov.state(), ProvisionState::Idle);

        assert!(prov.ensure_connected(Duration::from_secs(15)));
        assert_eq!(prov.link().driver().joins(), 2);
    }

    // ==================== Blocking Helper Tests ====================

    #[test]
    fn test_block_until_provisioned_times_out() {
        let clock = ManualPlatform::new();
        let mut prov = provisioner(MemoryCredentialStore::new(), &clock);

        assert!(!prov.block_until_provisioned(Some(Duration::from_secs(1))));
        assert!(clock.elapsed() >= Duration::from_secs(1));
        assert!(clock.elapsed() <= Duration::from_millis(1010));
        assert!(prov.is_portal_active());
    }

    #[test]
    fn test_block_until_provisioned_with_stored_credential() {
        let clock = ManualPlatform::new();
        let store =
            MemoryCredentialStore::with_credential(Credential::new("HomeNet", "secret123").unwrap());
        let mut prov = provisioner(store, &clock);
        assert!(prov.block_until_provisioned(None));
        assert_eq!(prov.state(), ProvisionState::Connected);
    }

    // ==================== Reset Tests ====================

    #[test]
    fn test_forget_and_restart() {
        let clock = ManualPlatform::new();
        let store =
            MemoryCredentialStore::with_credential(Credential::new("HomeNet", "secret123").unwrap());
        let mut prov = provisioner(store, &clock);
        prov.ensure_connected(Duration::from_secs(15));

        prov.forget_and_restart();
        assert!(prov.store().load().is_none());
        assert_eq!(clock.restarts(), 1);
        assert!(clock.elapsed() >= RESTART_DELAY);
    }
}
