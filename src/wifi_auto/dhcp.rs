//! Minimal DHCP server for the portal network.
//!
//! Clients joining the access point get an address from a small pool starting at `.100`,
//! with the device itself as router and DNS server. That second part is what routes their
//! lookups into the DNS hijack.

#![allow(clippy::future_not_send, reason = "single-threaded")]
#![allow(
    clippy::indexing_slicing,
    reason = "offsets are checked against the fixed BOOTP layout before use"
)]

use core::convert::Infallible;

use embassy_net::{
    Ipv4Address, Stack,
    udp::{PacketMetadata, UdpSocket},
};
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;

use crate::radio::AccessPointConfig;

/// UDP port the server binds.
pub const DHCP_SERVER_PORT: u16 = 67;
/// UDP port replies are broadcast to.
pub const DHCP_CLIENT_PORT: u16 = 68;
/// Concurrent leases handed out.
pub const MAX_LEASES: usize = 16;
/// Host number of the first pooled address.
pub const POOL_FIRST_HOST: u8 = 100;
/// Short leases keep portal clients renewing while they are on the setup network.
pub const LEASE_SECONDS: u32 = 30;

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const BOOTP_LEN: usize = 240;
const MIN_REPLY_LEN: usize = 300;
const FRAME_LEN: usize = 768;
const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Client hardware address.
pub type MacAddress = [u8; 6];

/// DHCP message type (option 53).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Other(u8),
}

impl MessageKind {
    const fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Other(other),
        }
    }

    const fn code(self) -> u8 {
        match self {
            Self::Discover => 1,
            Self::Offer => 2,
            Self::Request => 3,
            Self::Decline => 4,
            Self::Ack => 5,
            Self::Nak => 6,
            Self::Release => 7,
            Self::Inform => 8,
            Self::Other(code) => code,
        }
    }
}

/// The fields of a client BOOTREQUEST the server acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DhcpRequest {
    pub kind: MessageKind,
    pub transaction_id: u32,
    pub flags: u16,
    pub client_mac: MacAddress,
    pub client_ip: Option<Ipv4Address>,
    pub requested_ip: Option<Ipv4Address>,
    pub server_id: Option<Ipv4Address>,
}

impl DhcpRequest {
    /// Parse an Ethernet BOOTREQUEST carrying a message-type option.
    #[must_use]
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < BOOTP_LEN || frame[0] != 1 || frame[1] != 1 || frame[2] != 6 {
            return None;
        }
        if frame[236..240] != MAGIC_COOKIE {
            return None;
        }

        let mut kind = None;
        let mut requested_ip = None;
        let mut server_id = None;
        let mut options = &frame[BOOTP_LEN..];
        while let Some((&code, rest)) = options.split_first() {
            match code {
                0 => {
                    options = rest;
                    continue;
                }
                255 => break,
                _ => {}
            }
            let (&len, rest) = rest.split_first()?;
            let len = usize::from(len);
            let data = rest.get(..len)?;
            match (code, data) {
                (50, &[a, b, c, d]) => requested_ip = Some(Ipv4Address::new(a, b, c, d)),
                (53, &[code]) => kind = Some(MessageKind::from_code(code)),
                (54, &[a, b, c, d]) => server_id = Some(Ipv4Address::new(a, b, c, d)),
                _ => {}
            }
            options = &rest[len..];
        }

        let ciaddr = Ipv4Address::new(frame[12], frame[13], frame[14], frame[15]);
        let mut client_mac = [0u8; 6];
        client_mac.copy_from_slice(&frame[28..34]);

        Some(Self {
            kind: kind?,
            transaction_id: u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
            flags: u16::from_be_bytes([frame[10], frame[11]]),
            client_mac,
            client_ip: (ciaddr != Ipv4Address::UNSPECIFIED).then_some(ciaddr),
            requested_ip,
            server_id,
        })
    }
}

/// Addressing of the portal network as DHCP hands it out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DhcpNetwork {
    pub server: Ipv4Address,
    pub netmask: Ipv4Address,
    pub pool_start: Ipv4Address,
    pub pool_size: u8,
}

impl DhcpNetwork {
    /// Pool of [`MAX_LEASES`] addresses from host `.100` of the access point's subnet.
    #[must_use]
    pub fn for_access_point(config: &AccessPointConfig) -> Self {
        let network = to_u32(config.address) & to_u32(config.netmask);
        Self {
            server: config.address,
            netmask: config.netmask,
            pool_start: from_u32(network | u32::from(POOL_FIRST_HOST)),
            pool_size: MAX_LEASES as u8,
        }
    }

    /// Directed broadcast address of the subnet.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Address {
        from_u32(to_u32(self.server) | !to_u32(self.netmask))
    }

    fn contains(&self, ip: Ipv4Address) -> bool {
        let offset = to_u32(ip).wrapping_sub(to_u32(self.pool_start));
        offset < u32::from(self.pool_size)
    }

    fn nth(&self, offset: u8) -> Ipv4Address {
        from_u32(to_u32(self.pool_start).wrapping_add(u32::from(offset)))
    }
}

#[derive(Clone, Copy, Debug)]
struct Lease {
    mac: MacAddress,
    ip: Ipv4Address,
    expires_at: Instant,
}

/// Leases currently handed out, keyed by client MAC.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: Vec<Lease, MAX_LEASES>,
}

impl LeaseTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { leases: Vec::new() }
    }

    /// Grant or renew a lease for `mac` at `now`.
    ///
    /// A `requested` address inside the pool and not held by another client is honored.
    /// Otherwise the client keeps its current address, or gets the lowest free one.
    /// Returns `None` when the pool is exhausted.
    pub fn assign(
        &mut self,
        network: &DhcpNetwork,
        mac: MacAddress,
        requested: Option<Ipv4Address>,
        now: Instant,
    ) -> Option<Ipv4Address> {
        self.leases.retain(|lease| lease.expires_at > now);
        let expires_at = now + Duration::from_secs(u64::from(LEASE_SECONDS));

        let wanted = requested
            .filter(|ip| network.contains(*ip))
            .filter(|ip| self.leases.iter().all(|lease| lease.mac == mac || lease.ip != *ip));

        if let Some(existing) = self.leases.iter_mut().find(|lease| lease.mac == mac) {
            if let Some(ip) = wanted {
                existing.ip = ip;
            }
            existing.expires_at = expires_at;
            return Some(existing.ip);
        }

        let ip = wanted.or_else(|| {
            (0..network.pool_size)
                .map(|offset| network.nth(offset))
                .find(|candidate| self.leases.iter().all(|lease| lease.ip != *candidate))
        })?;
        self.leases.push(Lease { mac, ip, expires_at }).ok()?;
        Some(ip)
    }

    /// Whether a live lease on `ip` belongs to a client other than `mac`.
    #[must_use]
    pub fn held_by_other(&self, mac: MacAddress, ip: Ipv4Address, now: Instant) -> bool {
        self.leases
            .iter()
            .any(|lease| lease.ip == ip && lease.mac != mac && lease.expires_at > now)
    }

    /// Forget the lease held by `mac`, if any.
    pub fn release(&mut self, mac: MacAddress) {
        self.leases.retain(|lease| lease.mac != mac);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

fn append_option(dest: &mut [u8], code: u8, payload: &[u8]) -> Option<usize> {
    let needed = payload.len() + 2;
    let slot = dest.get_mut(..needed)?;
    slot[0] = code;
    slot[1] = u8::try_from(payload.len()).ok()?;
    slot[2..].copy_from_slice(payload);
    Some(needed)
}

/// Write the BOOTREPLY answering `request` with `offered`.
///
/// A NAK carries only the message type and server identifier. Returns the reply length,
/// or `None` when `out` is too small.
pub fn build_reply(
    out: &mut [u8],
    request: &DhcpRequest,
    kind: MessageKind,
    offered: Ipv4Address,
    network: &DhcpNetwork,
) -> Option<usize> {
    if out.len() < MIN_REPLY_LEN {
        return None;
    }
    let server = network.server.octets();

    out.fill(0);
    out[0] = 2; // BOOTREPLY
    out[1] = 1;
    out[2] = 6;
    out[4..8].copy_from_slice(&request.transaction_id.to_be_bytes());
    out[10..12].copy_from_slice(&request.flags.to_be_bytes());
    out[16..20].copy_from_slice(&offered.octets());
    out[20..24].copy_from_slice(&server);
    out[28..34].copy_from_slice(&request.client_mac);
    out[236..240].copy_from_slice(&MAGIC_COOKIE);

    let renewal = LEASE_SECONDS / 2;
    let rebinding = LEASE_SECONDS / 8 * 7;

    let mut len = BOOTP_LEN;
    len += append_option(&mut out[len..], 53, &[kind.code()])?;
    len += append_option(&mut out[len..], 54, &server)?;
    if kind == MessageKind::Nak {
        *out.get_mut(len)? = 255;
        return Some(len + 1);
    }
    len += append_option(&mut out[len..], 51, &LEASE_SECONDS.to_be_bytes())?;
    len += append_option(&mut out[len..], 58, &renewal.to_be_bytes())?;
    len += append_option(&mut out[len..], 59, &rebinding.to_be_bytes())?;
    len += append_option(&mut out[len..], 1, &network.netmask.octets())?;
    len += append_option(&mut out[len..], 3, &server)?; // router
    len += append_option(&mut out[len..], 6, &server)?; // DNS server
    len += append_option(&mut out[len..], 28, &network.broadcast().octets())?;
    *out.get_mut(len)? = 255;
    Some(len + 1)
}

/// Decide how to answer one request. Returns the reply kind and address, or `None` when
/// the request needs no reply.
pub fn respond(
    leases: &mut LeaseTable,
    network: &DhcpNetwork,
    request: &DhcpRequest,
    now: Instant,
) -> Option<(MessageKind, Ipv4Address)> {
    let reply = match request.kind {
        MessageKind::Discover => MessageKind::Offer,
        MessageKind::Request => {
            // Addressed to some other server on the same segment.
            if request.server_id.is_some_and(|id| id != network.server) {
                return None;
            }
            if let Some(ip) = request.requested_ip.or(request.client_ip)
                && (!network.contains(ip) || leases.held_by_other(request.client_mac, ip, now))
            {
                info!("DHCP NAK for {:?}", ip.octets());
                return Some((MessageKind::Nak, Ipv4Address::UNSPECIFIED));
            }
            MessageKind::Ack
        }
        MessageKind::Decline | MessageKind::Release => {
            leases.release(request.client_mac);
            return None;
        }
        _ => return None,
    };
    let wanted = request.requested_ip.or(request.client_ip);
    let Some(ip) = leases.assign(network, request.client_mac, wanted, now) else {
        warn!("DHCP pool exhausted");
        return None;
    };
    Some((reply, ip))
}

/// Serve DHCP on `stack` for the portal network until cancelled.
pub async fn run_dhcp_server(stack: Stack<'_>, access_point: &AccessPointConfig) -> Infallible {
    let network = DhcpNetwork::for_access_point(access_point);

    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; FRAME_LEN];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; FRAME_LEN];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    while let Err(err) = socket.bind(DHCP_SERVER_PORT) {
        error!("DHCP server failed to bind: {:?}", err);
        Timer::after(BIND_RETRY_DELAY).await;
    }
    info!("DHCP server listening on {:?}", network.server.octets());

    let mut leases = LeaseTable::new();
    let mut frame = [0u8; FRAME_LEN];
    let mut reply = [0u8; FRAME_LEN];
    loop {
        let len = match socket.recv_from(&mut frame).await {
            Ok((len, _remote)) => len,
            Err(err) => {
                warn!("DHCP recv error: {:?}", err);
                continue;
            }
        };
        let Some(request) = DhcpRequest::parse(&frame[..len]) else {
            continue;
        };
        debug!("DHCP {:?} from {:?}", request.kind, request.client_mac);

        let Some((kind, ip)) = respond(&mut leases, &network, &request, Instant::now()) else {
            continue;
        };
        let Some(reply_len) = build_reply(&mut reply, &request, kind, ip, &network) else {
            warn!("Failed to build DHCP reply");
            continue;
        };
        let target = (network.broadcast(), DHCP_CLIENT_PORT);
        match socket.send_to(&reply[..reply_len], target).await {
            Ok(()) => debug!("DHCP {:?} {:?}", kind, ip.octets()),
            Err(err) => warn!("DHCP send error: {:?}", err),
        }
    }
}

const fn to_u32(ip: Ipv4Address) -> u32 {
    u32::from_be_bytes(ip.octets())
}

const fn from_u32(value: u32) -> Ipv4Address {
    let [a, b, c, d] = value.to_be_bytes();
    Ipv4Address::new(a, b, c, d)
}
