//! DNS hijack responder.
//!
//! Answers every standard query, whatever the name or record type, with a
//! single `A` record pointing at the access point. Phones use this to notice
//! the captive portal and open the setup page.
//!
//! # Wire format
//!
//! ```text
//! Header (12 bytes):   ID | flags | QDCOUNT | ANCOUNT | NSCOUNT | ARCOUNT
//! Question (copied):   QNAME | QTYPE | QCLASS
//! Answer:              0xC00C (pointer to QNAME) | TYPE A | CLASS IN | TTL | RDLENGTH 4 | address
//! ```

use log::{debug, trace};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Largest datagram handled (classic DNS over UDP limit).
const MAX_MESSAGE_LEN: usize = 512;

/// TTL of hijacked answers, in seconds. Short so clients re-resolve once
/// the device leaves setup mode.
const ANSWER_TTL_SECS: u32 = 60;

const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_RD: u16 = 0x0100;
const OPCODE_MASK: u16 = 0x7800;
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

/// Build the hijacked answer for `query`.
///
/// Returns `None` for datagrams that are not standard queries (responses,
/// other opcodes, no question, truncated or malformed names).
pub fn hijack_response(query: &[u8], address: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < HEADER_LEN || query.len() > MAX_MESSAGE_LEN {
        return None;
    }

    let flags = u16::from_be_bytes([query[2], query[3]]);
    if flags & FLAG_QR != 0 || flags & OPCODE_MASK != 0 {
        return None;
    }
    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    if qdcount == 0 {
        return None;
    }

    let question_end = question_end(query)?;

    let mut response = Vec::with_capacity(question_end + 16);
    response.extend_from_slice(&query[0..2]);
    response.extend_from_slice(&(FLAG_QR | FLAG_AA | (flags & FLAG_RD)).to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    response.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    response.extend_from_slice(&query[HEADER_LEN..question_end]);

    response.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
    response.extend_from_slice(&TYPE_A.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());
    response.extend_from_slice(&ANSWER_TTL_SECS.to_be_bytes());
    response.extend_from_slice(&4u16.to_be_bytes());
    response.extend_from_slice(&address.octets());
    Some(response)
}

/// Offset just past the first question (name, type and class).
fn question_end(query: &[u8]) -> Option<usize> {
    let mut pos = HEADER_LEN;
    loop {
        let len = *query.get(pos)? as usize;
        match len {
            0 => {
                pos += 1;
                break;
            }
            l if l & 0xC0 == 0xC0 => {
                query.get(pos + 1)?;
                pos += 2;
                break;
            }
            l if l & 0xC0 != 0 => return None,
            l => pos += 1 + l,
        }
    }
    let end = pos + 4;
    (end <= query.len()).then_some(end)
}

/// Extract the queried name for logging. Best effort.
fn query_name(query: &[u8]) -> String {
    let mut labels = Vec::new();
    let mut pos = HEADER_LEN;
    while let Some(&len) = query.get(pos) {
        if len == 0 || len & 0xC0 != 0 {
            break;
        }
        let start = pos + 1;
        let end = start + len as usize;
        match query.get(start..end) {
            Some(label) => labels.push(String::from_utf8_lossy(label).into_owned()),
            None => break,
        }
        pos = end;
    }
    labels.join(".")
}

/// Non-blocking UDP responder.
pub struct DnsResponder {
    socket: UdpSocket,
    address: Ipv4Addr,
}

impl DnsResponder {
    /// Bind to `bind` and answer with `address`.
    pub fn bind(bind: SocketAddr, address: Ipv4Addr) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        debug!("DNS responder on {} answering {}", socket.local_addr()?, address);
        Ok(Self { socket, address })
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Answer at most one pending query.
    ///
    /// Returns `Ok(true)` if a query was answered, `Ok(false)` if nothing was
    /// waiting or the datagram was dropped.
    pub fn process_next(&self) -> io::Result<bool> {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let (len, peer) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        };

        let query = &buf[..len];
        match hijack_response(query, self.address) {
            Some(response) => {
                trace!("DNS {} from {} -> {}", query_name(query), peer, self.address);
                self.socket.send_to(&response, peer)?;
                Ok(true)
            }
            None => {
                debug!("Dropped {}-byte non-query datagram from {}", len, peer);
                Ok(false)
            }
        }
    }
}
