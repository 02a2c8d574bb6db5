//! Captive portal: setup access point, DNS hijack and web UI.
//!
//! # Components
//!
//! - [`dns`] - answers every name with the access point address
//! - [`routes`] - route table and handlers
//! - [`server`] - HTTP transport (`tiny_http`)
//!
//! [`CaptivePortal`] owns one running session at a time. Nothing here spawns
//! work of its own: the caller drives both listeners with [`CaptivePortal::pump`].

pub mod dns;
pub mod routes;
pub mod server;

use crate::config::{Credential, ProvisionerConfig};
use crate::link::{AccessPointConfig, LinkController, LinkDriver, LinkError, LinkView};
use dns::DnsResponder;
use log::{debug, info, warn};
use routes::{dispatch, PortalContext, Route, ROUTES};
use server::HttpEndpoint;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

/// Portal lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalPhase {
    Stopped,
    Starting,
    Running,
}

/// Settings the portal takes from [`ProvisionerConfig`].
#[derive(Debug, Clone)]
struct PortalSettings {
    ap_password: String,
    ap_address: Ipv4Addr,
    ap_prefix_len: u8,
    listen_address: Ipv4Addr,
    dns_port: u16,
    http_port: u16,
    hostname: String,
}

impl From<&ProvisionerConfig> for PortalSettings {
    fn from(config: &ProvisionerConfig) -> Self {
        Self {
            ap_password: config.ap_password.clone(),
            ap_address: config.ap_address,
            ap_prefix_len: config.ap_prefix_len,
            listen_address: config.listen_address,
            dns_port: config.dns_port,
            http_port: config.http_port,
            hostname: config.hostname.clone(),
        }
    }
}

struct PortalSession {
    ap_name: String,
    routes: &'static [Route],
    dns: DnsResponder,
    http: HttpEndpoint,
}

/// Setup access point plus its DNS and HTTP listeners.
pub struct CaptivePortal {
    settings: PortalSettings,
    phase: PortalPhase,
    session: Option<PortalSession>,
    pending: Option<Credential>,
}

impl CaptivePortal {
    /// Create a stopped portal.
    pub fn new(config: &ProvisionerConfig) -> Self {
        Self {
            settings: PortalSettings::from(config),
            phase: PortalPhase::Stopped,
            session: None,
            pending: None,
        }
    }

    pub fn phase(&self) -> PortalPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == PortalPhase::Running
    }

    /// Name of the running access point.
    pub fn ap_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.ap_name.as_str())
    }

    /// Bound DNS address of the running session.
    pub fn dns_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(|s| s.dns.local_addr().ok())
    }

    /// Bound HTTP address of the running session.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.session.as_ref().and_then(|s| s.http.local_addr())
    }

    /// Bring up the access point named `ap_name` and start both listeners.
    ///
    /// Does nothing if the portal is already running. On failure everything
    /// brought up so far is torn down again and the portal stays stopped.
    pub fn start<D: LinkDriver>(
        &mut self,
        link: &mut LinkController<D>,
        ap_name: &str,
    ) -> Result<(), PortalError> {
        if self.is_running() {
            debug!("Portal already running");
            return Ok(());
        }
        self.phase = PortalPhase::Starting;

        let ap = AccessPointConfig {
            ssid: ap_name.to_string(),
            password: self.settings.ap_password.clone(),
            address: self.settings.ap_address,
            prefix_len: self.settings.ap_prefix_len,
        };
        if let Err(e) = link.start_access_point(&ap) {
            self.phase = PortalPhase::Stopped;
            return Err(PortalError::AccessPoint(e));
        }

        let listen = self.settings.listen_address;
        let dns = match DnsResponder::bind(
            SocketAddr::from((listen, self.settings.dns_port)),
            self.settings.ap_address,
        ) {
            Ok(dns) => dns,
            Err(e) => {
                self.abort(link);
                return Err(PortalError::Dns(e));
            }
        };
        let http = match HttpEndpoint::bind(SocketAddr::from((listen, self.settings.http_port))) {
            Ok(http) => http,
            Err(e) => {
                self.abort(link);
                return Err(PortalError::Http(e));
            }
        };

        if let Err(e) = link.register_hostname(&self.settings.hostname, self.settings.http_port) {
            warn!("mDNS registration failed: {}", e);
        }

        info!(
            "Portal '{}' running, open http://{}/",
            ap_name, self.settings.ap_address
        );
        self.session = Some(PortalSession {
            ap_name: ap_name.to_string(),
            routes: ROUTES,
            dns,
            http,
        });
        self.phase = PortalPhase::Running;
        Ok(())
    }

    /// Answer at most one DNS query and serve at most one HTTP request.
    pub fn pump(&mut self, link: &mut dyn LinkView) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        if let Err(e) = session.dns.process_next() {
            warn!("DNS responder error: {}", e);
        }

        let routes = session.routes;
        let pending = &mut self.pending;
        let portal_address = self.settings.ap_address;
        let served = session.http.serve_one(|request| {
            let mut ctx = PortalContext {
                link,
                pending,
                portal_address,
            };
            dispatch(routes, request, &mut ctx)
        });
        if let Err(e) = served {
            warn!("HTTP endpoint error: {}", e);
        }
    }

    /// Take the latest submitted credential, if any.
    pub fn take_pending_submission(&mut self) -> Option<Credential> {
        self.pending.take()
    }

    /// Stop the listeners and the access point. Safe to call when stopped.
    pub fn stop<D: LinkDriver>(&mut self, link: &mut LinkController<D>) {
        if let Some(session) = self.session.take() {
            info!("Portal '{}' stopped", session.ap_name);
        }
        self.pending = None;
        if let Err(e) = link.stop_access_point() {
            warn!("Failed to stop access point: {}", e);
        }
        self.phase = PortalPhase::Stopped;
    }

    fn abort<D: LinkDriver>(&mut self, link: &mut LinkController<D>) {
        if let Err(e) = link.stop_access_point() {
            debug!("Access point teardown after failed start: {}", e);
        }
        self.session = None;
        self.phase = PortalPhase::Stopped;
    }
}

/// Portal start-up errors.
#[derive(Debug)]
pub enum PortalError {
    AccessPoint(LinkError),
    Dns(io::Error),
    Http(io::Error),
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::AccessPoint(e) => write!(f, "access point: {}", e),
            PortalError::Dns(e) => write!(f, "DNS listener: {}", e),
            PortalError::Http(e) => write!(f, "HTTP listener: {}", e),
        }
    }
}

impl std::error::Error for PortalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PortalError::AccessPoint(e) => Some(e),
            PortalError::Dns(e) | PortalError::Http(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimulatedDriver;
    use std::io::{Read, Write};
    use std::net::{TcpStream, UdpSocket};
    use std::time::{Duration, Instant};

    fn loopback_config() -> ProvisionerConfig {
        ProvisionerConfig {
            listen_address: Ipv4Addr::LOCALHOST,
            dns_port: 0,
            http_port: 0,
            ..Default::default()
        }
    }

    fn link() -> LinkController<SimulatedDriver> {
        LinkController::new(
            SimulatedDriver::new().with_network("HomeNet", "secret123", -40),
            Duration::from_millis(250),
        )
    }

    fn http_exchange(
        portal: &mut CaptivePortal,
        link: &mut LinkController<SimulatedDriver>,
        raw: String,
    ) -> String {
        let addr = portal.http_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(raw.as_bytes()).unwrap();
            let mut reply = String::new();
            stream.read_to_string(&mut reply).unwrap();
            reply
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while !client.is_finished() {
            assert!(Instant::now() < deadline, "no reply");
            portal.pump(link);
            std::thread::sleep(Duration::from_millis(1));
        }
        client.join().unwrap()
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_start_twice_keeps_one_session() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        assert_eq!(portal.phase(), PortalPhase::Stopped);

        portal.start(&mut link, "Provisioner-Setup-1234").unwrap();
        let http = portal.http_addr();
        portal.start(&mut link, "Provisioner-Setup-1234").unwrap();

        assert!(portal.is_running());
        assert_eq!(portal.http_addr(), http);
        assert_eq!(portal.ap_name(), Some("Provisioner-Setup-1234"));
        assert_eq!(link.driver().ap_starts(), 1);
        assert_eq!(link.driver().ap_ssid(), Some("Provisioner-Setup-1234"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.stop(&mut link);
        assert_eq!(link.driver().ap_stops(), 0);

        portal.start(&mut link, "Setup-0001").unwrap();
        portal.stop(&mut link);
        portal.stop(&mut link);

        assert_eq!(portal.phase(), PortalPhase::Stopped);
        assert!(portal.http_addr().is_none());
        assert!(!link.is_ap_active());
        assert_eq!(link.driver().ap_stops(), 1);
    }

    #[test]
    fn test_bad_ap_password_leaves_portal_stopped() {
        let mut link = link();
        let config = ProvisionerConfig {
            ap_password: "short".into(),
            ..loopback_config()
        };
        let mut portal = CaptivePortal::new(&config);

        let err = portal.start(&mut link, "Setup-0001").unwrap_err();
        assert!(matches!(err, PortalError::AccessPoint(LinkError::InvalidPassword)));
        assert_eq!(portal.phase(), PortalPhase::Stopped);
        assert_eq!(link.driver().ap_starts(), 0);
    }

    #[test]
    fn test_dns_bind_failure_tears_down_ap() {
        let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ProvisionerConfig {
            dns_port: taken.local_addr().unwrap().port(),
            ..loopback_config()
        };
        let mut link = link();
        let mut portal = CaptivePortal::new(&config);

        let err = portal.start(&mut link, "Setup-0001").unwrap_err();
        assert!(matches!(err, PortalError::Dns(_)));
        assert!(!portal.is_running());
        assert!(!link.is_ap_active());
        assert!(!link.driver().ap_active());
    }

    #[test]
    fn test_mdns_failure_is_not_fatal() {
        let mut link = LinkController::new(
            SimulatedDriver::new().with_failing_hostname(),
            Duration::from_millis(250),
        );
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.start(&mut link, "Setup-0001").unwrap();
        assert!(portal.is_running());
    }

    #[test]
    fn test_pump_when_stopped_does_nothing() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.pump(&mut link);
        assert!(portal.take_pending_submission().is_none());
    }

    // ==================== Traffic Tests ====================

    #[test]
    fn test_save_over_http_becomes_pending() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.start(&mut link, "Setup-0001").unwrap();

        let body = "ssid=HomeNet&pass=secret123";
        let reply = http_exchange(
            &mut portal,
            &mut link,
            format!(
                "POST /save HTTP/1.1\r\nHost: 192.168.4.1\r\nConnection: close\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\
                 Content-Length: {}\r\n\r\n{}",
                body.len(),
                body
            ),
        );
        assert!(reply.starts_with("HTTP/1.1 200"));
        assert!(reply.ends_with(r#"{"ok":true}"#));

        let credential = portal.take_pending_submission().unwrap();
        assert_eq!(credential.ssid(), "HomeNet");
        assert_eq!(credential.password(), "secret123");
        assert!(portal.take_pending_submission().is_none());
    }

    #[test]
    fn test_unknown_path_redirects_to_portal() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.start(&mut link, "Setup-0001").unwrap();

        let reply = http_exchange(
            &mut portal,
            &mut link,
            "GET /generate_204 HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".into(),
        );
        assert!(reply.starts_with("HTTP/1.1 302"));
        assert!(reply.contains("Location: http://192.168.4.1/"));
    }

    #[test]
    fn test_dns_query_answered_through_pump() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.start(&mut link, "Setup-0001").unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        // ID 0x0102, RD, one question for "a.b" type A class IN.
        let query = [
            0x01, 0x02, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 1, b'a', 1, b'b', 0, 0, 1, 0, 1,
        ];
        client.send_to(&query, portal.dns_addr().unwrap()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 512];
        let len = loop {
            assert!(Instant::now() < deadline, "no DNS answer");
            portal.pump(&mut link);
            if let Ok((len, _)) = client.recv_from(&mut buf) {
                break len;
            }
        };
        assert_eq!(&buf[0..2], &[0x01, 0x02]);
        assert_eq!(&buf[len - 4..len], &[192, 168, 4, 1]);
    }

    #[test]
    fn test_stop_discards_pending_submission() {
        let mut link = link();
        let mut portal = CaptivePortal::new(&loopback_config());
        portal.start(&mut link, "Setup-0001").unwrap();
        portal.pending = Some(Credential::new("HomeNet", "secret123").unwrap());

        portal.stop(&mut link);
        assert!(portal.take_pending_submission().is_none());
    }
}
