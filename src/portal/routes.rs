//! Portal route table and request handlers.
//!
//! Handlers are plain functions of the request and a [`PortalContext`], so they
//! are tested without sockets. The HTTP transport lives in `server.rs`.
//!
//! | Method | Path         | Response                                      |
//! |--------|--------------|-----------------------------------------------|
//! | GET    | `/`          | setup page                                    |
//! | GET    | `/scan.json` | `{"networks":[{"ssid":..,"rssi":..}]}`        |
//! | GET    | `/status`    | HTML fragment describing the link             |
//! | POST   | `/save`      | `{"ok":true}`, or 400 without `ssid`          |
//! | any    | other        | 302 to the portal root                        |

use crate::config::Credential;
use crate::link::{LinkView, ScannedNetwork};
use log::{debug, info, warn};
use serde::Serialize;
use std::net::Ipv4Addr;

/// Setup page served at `/`.
pub const INDEX_HTML: &str = include_str!("index.html");

/// HTTP method, reduced to what the portal distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

/// A request as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Path without query string.
    pub path: String,
    /// Raw query string (after `?`), possibly empty.
    pub query: String,
    /// Request body (form-encoded for `/save`).
    pub body: String,
}

impl Request {
    /// Build a request from a method and a raw URL (`/path?query`).
    pub fn new(method: Method, url: &str, body: impl Into<String>) -> Self {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, query),
            None => (url, ""),
        };
        Self {
            method,
            path: path.to_string(),
            query: query.to_string(),
            body: body.into(),
        }
    }

    /// Look up a form field, preferring the body over the query string.
    pub fn field(&self, name: &str) -> Option<String> {
        form_value(&self.body, name).or_else(|| form_value(&self.query, name))
    }
}

/// A response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type,
            headers: vec![("Cache-Control", "no-cache".to_string())],
            body: body.into(),
        }
    }

    /// `200` HTML.
    pub fn html(body: impl Into<String>) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    /// JSON with the given status.
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, "application/json", body)
    }

    /// Plain text with the given status.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status, "text/plain", body)
    }

    /// `302` to `location` with an empty body.
    pub fn redirect(location: String) -> Self {
        Self::new(302, "text/plain", "").with_header("Location", location)
    }

    /// Add a header.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// What a handler may touch.
pub struct PortalContext<'a> {
    /// Scan access and link state.
    pub link: &'a mut dyn LinkView,
    /// Slot for the latest submitted credential.
    pub pending: &'a mut Option<Credential>,
    /// Address of the portal (the access point gateway).
    pub portal_address: Ipv4Addr,
}

/// Request handler.
pub type Handler = fn(&Request, &mut PortalContext<'_>) -> Response;

/// One entry of the route table.
#[derive(Clone, Copy)]
pub struct Route {
    pub method: Method,
    pub path: &'static str,
    pub handler: Handler,
}

/// The portal's routes.
pub const ROUTES: &[Route] = &[
    Route {
        method: Method::Get,
        path: "/",
        handler: index,
    },
    Route {
        method: Method::Get,
        path: "/scan.json",
        handler: scan,
    },
    Route {
        method: Method::Get,
        path: "/status",
        handler: status,
    },
    Route {
        method: Method::Post,
        path: "/save",
        handler: save,
    },
];

/// Route `request` through `routes`. Unmatched requests are redirected.
pub fn dispatch(routes: &[Route], request: &Request, ctx: &mut PortalContext<'_>) -> Response {
    match routes
        .iter()
        .find(|r| r.method == request.method && r.path == request.path)
    {
        Some(route) => (route.handler)(request, ctx),
        None => not_found(request, ctx),
    }
}

fn index(_request: &Request, _ctx: &mut PortalContext<'_>) -> Response {
    Response::html(INDEX_HTML)
}

#[derive(Serialize)]
struct ScanReport {
    networks: Vec<ScannedNetwork>,
}

fn scan(_request: &Request, ctx: &mut PortalContext<'_>) -> Response {
    let networks = match ctx.link.scan() {
        Ok(networks) => networks
            .into_iter()
            .filter(|n| !n.ssid.is_empty())
            .collect(),
        Err(e) => {
            warn!("Scan failed, serving empty list: {}", e);
            Vec::new()
        }
    };

    let body = serde_json::to_string(&ScanReport { networks })
        .unwrap_or_else(|_| r#"{"networks":[]}"#.to_string());
    Response::json(200, body).with_header("Access-Control-Allow-Origin", "*")
}

fn status(_request: &Request, ctx: &mut PortalContext<'_>) -> Response {
    Response::html(ctx.link.state().status_html())
}

fn save(request: &Request, ctx: &mut PortalContext<'_>) -> Response {
    let ssid = match request.field("ssid") {
        Some(ssid) if !ssid.is_empty() => ssid,
        _ => {
            debug!("Rejected /save without ssid");
            return Response::text(400, "missing ssid");
        }
    };
    let pass = request.field("pass").unwrap_or_default();

    match Credential::new(ssid, pass) {
        Ok(credential) => {
            info!("Credentials submitted for '{}'", credential.ssid());
            if ctx.pending.replace(credential).is_some() {
                debug!("Replaced an unconsumed submission");
            }
            Response::json(200, serde_json::json!({ "ok": true }).to_string())
        }
        Err(e) => {
            debug!("Rejected /save: {}", e);
            Response::text(400, e.to_string())
        }
    }
}

fn not_found(request: &Request, ctx: &mut PortalContext<'_>) -> Response {
    debug!("Redirecting {:?} {}", request.method, request.path);
    Response::redirect(format!("http://{}/", ctx.portal_address))
}

/// Find `name` in an `application/x-www-form-urlencoded` string.
fn form_value(encoded: &str, name: &str) -> Option<String> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key) == name).then(|| percent_decode(value))
        })
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes are kept verbatim.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match bytes.get(i + 1..i + 3).and_then(hex_pair) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                None => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    let hi = char::from(pair[0]).to_digit(16)?;
    let lo = char::from(pair[1]).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}
