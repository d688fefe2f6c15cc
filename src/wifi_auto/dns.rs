//! DNS hijack responder for the captive portal.
//!
//! Every standard query is answered with a single A record pointing at the portal, so
//! whatever URL a phone or laptop probes for captive-portal detection lands on our HTTP
//! server.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;

use embassy_futures::yield_now;
use embassy_net::Ipv4Address;
use embassy_time::{Duration, Timer};
use heapless::String;

use crate::Error;
use crate::transport::DatagramSocket;

/// UDP port the responder binds.
pub const DNS_PORT: u16 = 53;
/// Largest datagram received or sent.
pub const MAX_PACKET_LEN: usize = 512;
/// Longest domain name kept from a question (RFC 1035 limit).
pub const MAX_DOMAIN_LEN: usize = 255;

const HEADER_LEN: usize = 12;
const QTYPE_QCLASS_LEN: usize = 4;
const MAX_LABEL_LEN: usize = 63;
const STANDARD_QUERY: u8 = 0;
// QR=1, RD=1, RA=1
const RESPONSE_FLAGS: [u8; 2] = [0x81, 0x80];
const ANSWER_TTL_SECONDS: u32 = 60;
const ANSWER_LEN: usize = 16;

/// Parsed view over one inbound DNS datagram.
///
/// [`domain`](Self::domain) is empty for anything other than a well-formed standard query,
/// and such queries have no [`response`](Self::response).
#[derive(Debug)]
pub struct DnsQuery<'a> {
    packet: &'a [u8],
    opcode: u8,
    domain: String<MAX_DOMAIN_LEN>,
    question_end: usize,
}

impl<'a> DnsQuery<'a> {
    /// Parse `packet`. Returns `None` when it is shorter than a DNS header.
    #[must_use]
    pub fn parse(packet: &'a [u8]) -> Option<Self> {
        let header = packet.get(..HEADER_LEN)?;
        let opcode = (header[2] >> 3) & 0x0F;
        let mut query = Self {
            packet,
            opcode,
            domain: String::new(),
            question_end: HEADER_LEN,
        };
        if opcode == STANDARD_QUERY {
            if let Some((domain, question_end)) = parse_question(packet) {
                query.domain = domain;
                query.question_end = question_end;
            }
        }
        Some(query)
    }

    /// The four-bit opcode from the header.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Dot-joined question name, with a trailing dot (`captive.example.`).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Transaction id, echoed in the response.
    #[must_use]
    pub fn transaction_id(&self) -> u16 {
        u16::from_be_bytes([self.packet[0], self.packet[1]])
    }

    /// Question count from the header.
    #[must_use]
    pub fn question_count(&self) -> u16 {
        u16::from_be_bytes([self.packet[4], self.packet[5]])
    }

    /// The question section exactly as received (name, type and class).
    #[must_use]
    pub fn question(&self) -> &'a [u8] {
        &self.packet[HEADER_LEN..self.question_end]
    }

    /// Write an answer resolving the question to `address` into `out`.
    ///
    /// Returns the response length, or `None` when there is nothing to answer: a
    /// non-standard opcode, a malformed or empty name, more than one question, or an `out`
    /// too small for the response. Callers drop the datagram in that case.
    pub fn response(&self, address: Ipv4Address, out: &mut [u8]) -> Option<usize> {
        if self.domain.is_empty() || self.question_count() != 1 {
            return None;
        }
        let question = self.question();
        let answer_start = HEADER_LEN + question.len();
        let total = answer_start + ANSWER_LEN;
        let out = out.get_mut(..total)?;

        out[0..2].copy_from_slice(&self.packet[0..2]);
        out[2..4].copy_from_slice(&RESPONSE_FLAGS);
        // Question count doubles as answer count; no authority or additional records.
        out[4..6].copy_from_slice(&self.packet[4..6]);
        out[6..8].copy_from_slice(&self.packet[4..6]);
        out[8..12].fill(0);
        out[HEADER_LEN..answer_start].copy_from_slice(question);

        let answer = &mut out[answer_start..];
        answer[0..2].copy_from_slice(&[0xC0, 0x0C]); // pointer to the question name
        answer[2..4].copy_from_slice(&1u16.to_be_bytes()); // TYPE A
        answer[4..6].copy_from_slice(&1u16.to_be_bytes()); // CLASS IN
        answer[6..10].copy_from_slice(&ANSWER_TTL_SECONDS.to_be_bytes());
        answer[10..12].copy_from_slice(&4u16.to_be_bytes());
        answer[12..16].copy_from_slice(&address.octets());
        Some(total)
    }
}

/// Walk the length-prefixed labels of the first question.
///
/// Returns the dot-joined name and the offset just past QTYPE/QCLASS, or `None` when the
/// name runs off the packet, uses compression, is not UTF-8, or overflows.
fn parse_question(packet: &[u8]) -> Option<(String<MAX_DOMAIN_LEN>, usize)> {
    let mut domain = String::<MAX_DOMAIN_LEN>::new();
    let mut index = HEADER_LEN;
    loop {
        let len = usize::from(*packet.get(index)?);
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            return None;
        }
        let label = packet.get(index + 1..index + 1 + len)?;
        domain.push_str(core::str::from_utf8(label).ok()?).ok()?;
        domain.push('.').ok()?;
        index += 1 + len;
    }
    let question_end = index + 1 + QTYPE_QCLASS_LEN;
    if question_end > packet.len() {
        return None;
    }
    Some((domain, question_end))
}

/// Parse `packet` and, if it is answerable, write the hijacking response into `out`.
pub fn answer_query(packet: &[u8], address: Ipv4Address, out: &mut [u8]) -> Option<usize> {
    let query = DnsQuery::parse(packet)?;
    if query.domain().is_empty() {
        debug!("DNS: ignoring query with opcode {}", query.opcode());
        return None;
    }
    debug!("DNS: {} -> {:?}", query.domain(), address.octets());
    query.response(address, out)
}

/// Answer queries on `socket` until cancelled.
///
/// "No datagram" suspends for `idle_delay` and retries. Other receive and send errors are
/// logged and the loop carries on.
pub async fn run_dns_responder<D: DatagramSocket>(
    socket: &mut D,
    address: Ipv4Address,
    idle_delay: Duration,
) -> Infallible {
    info!("DNS server started - responding with {:?}", address.octets());

    let mut frame = [0u8; MAX_PACKET_LEN];
    let mut response = [0u8; MAX_PACKET_LEN];

    loop {
        match socket.recv_from(&mut frame).await {
            Ok((len, remote)) => {
                let packet = &frame[..len.min(frame.len())];
                let Some(response_len) = answer_query(packet, address, &mut response) else {
                    continue;
                };
                if let Err(err) = socket.send_to(&response[..response_len], remote).await {
                    warn!("DNS send error: {:?}", err);
                    yield_now().await;
                }
            }
            Err(Error::WouldBlock) => Timer::after(idle_delay).await,
            Err(err) => {
                warn!("DNS receive error: {:?}", err);
                yield_now().await;
            }
        }
    }
}
