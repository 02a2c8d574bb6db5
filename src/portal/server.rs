//! HTTP transport for the portal.
//!
//! Uses `tiny_http`, which works on both host and ESP32 (via std::net).
//! The listener thread belongs to `tiny_http`; requests are taken from its
//! queue one at a time with [`HttpEndpoint::serve_one`], so the caller's
//! cooperative loop decides when handlers run.

use super::routes::{Method, Request, Response};
use log::{debug, warn};
use std::io::{self, Read};
use std::net::SocketAddr;
use tiny_http::{Header, Server};

/// Largest request body read. `/save` needs well under this.
const MAX_BODY_LEN: u64 = 2048;

/// Non-blocking HTTP endpoint.
pub struct HttpEndpoint {
    server: Server,
}

impl HttpEndpoint {
    /// Start listening on `addr`.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| io::Error::new(io::ErrorKind::AddrInUse, format!("{}", e)))?;
        Ok(Self { server })
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve at most one queued request with `handle`.
    ///
    /// Returns `Ok(true)` if a request was served, `Ok(false)` if none was
    /// waiting.
    pub fn serve_one(&self, handle: impl FnOnce(&Request) -> Response) -> io::Result<bool> {
        let mut raw = match self.server.try_recv()? {
            Some(raw) => raw,
            None => return Ok(false),
        };

        let method = match raw.method() {
            tiny_http::Method::Get => Method::Get,
            tiny_http::Method::Post => Method::Post,
            _ => Method::Other,
        };

        let mut body = Vec::new();
        if let Err(e) = Read::take(raw.as_reader(), MAX_BODY_LEN).read_to_end(&mut body) {
            warn!("Failed to read request body: {}", e);
            body.clear();
        }

        let request = Request::new(method, raw.url(), String::from_utf8_lossy(&body));
        let response = handle(&request);
        debug!(
            "{:?} {} -> {}",
            request.method, request.path, response.status
        );

        if let Err(e) = raw.respond(into_tiny_response(response)) {
            warn!("Failed to send response: {}", e);
        }
        Ok(true)
    }
}

fn into_tiny_response(response: Response) -> tiny_http::Response<io::Cursor<Vec<u8>>> {
    let mut tiny = tiny_http::Response::from_string(response.body).with_status_code(response.status);

    let headers = std::iter::once(("Content-Type", response.content_type.to_string()))
        .chain(response.headers);
    for (name, value) in headers {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => tiny.add_header(header),
            Err(()) => warn!("Dropping invalid header {}", name),
        }
    }
    tiny
}
