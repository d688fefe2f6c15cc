//! The radio collaborator: station join/scan and access-point control.
//!
//! The connection state machine and the portal only ever talk to the radio through
//! [`Radio`], so they run unchanged against the CYW43 adapter on hardware and against a fake
//! in host tests.

#![allow(async_fn_in_trait, reason = "single-threaded executor; futures need not be Send")]

use embassy_net::Ipv4Address;
use heapless::Vec;

use crate::Result;
use crate::credential_store::NetworkName;

/// Most network names one scan reports.
pub const MAX_SCAN_RESULTS: usize = 16;

/// Names found by one scan.
pub type ScanResults = Vec<NetworkName, MAX_SCAN_RESULTS>;

/// How the access-point interface presents itself. Authentication is always open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPointConfig {
    /// Address of the device on the portal network. Also the gateway and DNS server.
    pub address: Ipv4Address,
    /// Subnet mask of the portal network.
    pub netmask: Ipv4Address,
    /// Broadcast name (SSID).
    pub ssid: NetworkName,
}

impl AccessPointConfig {
    /// Gateway handed to clients: the device itself.
    #[must_use]
    pub const fn gateway(&self) -> Ipv4Address {
        self.address
    }

    /// DNS server handed to clients: the device itself.
    #[must_use]
    pub const fn dns_server(&self) -> Ipv4Address {
        self.address
    }

    /// Prefix length of [`netmask`](Self::netmask).
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        // At most 32, so the narrowing cannot truncate.
        u32::from_be_bytes(self.netmask.octets()).count_ones() as u8
    }
}

/// A radio with one station interface and one access-point interface.
///
/// The radio is single-owner: callers never run two of these operations at once.
pub trait Radio {
    /// Start joining `name`. Completion is observed through [`is_joined`](Self::is_joined).
    async fn join(&mut self, name: &str, secret: &str) -> Result<()>;

    /// Whether the station interface is associated and has an address.
    fn is_joined(&self) -> bool;

    /// Leave whatever network the station interface is on.
    async fn disconnect(&mut self);

    /// List the names of nearby networks. Names may repeat and may be empty.
    async fn scan(&mut self) -> Result<ScanResults>;

    /// Apply address, subnet and broadcast name to the access-point interface.
    async fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<()>;

    /// Bring the access-point interface up or down.
    async fn set_access_point_active(&mut self, active: bool) -> Result<()>;
}

/// Build a [`NetworkName`] from raw SSID bytes, or `None` if they are empty, not UTF-8 or
/// too long.
#[must_use]
pub fn network_name_from_bytes(bytes: &[u8]) -> Option<NetworkName> {
    let text = core::str::from_utf8(bytes).ok()?;
    if text.is_empty() {
        return None;
    }
    NetworkName::try_from(text).ok()
}

/// Keep the first occurrence of each non-empty name, preserving scan order.
pub fn dedup_names(names: &mut ScanResults) {
    let mut unique = ScanResults::new();
    for name in names.iter() {
        if name.is_empty() || unique.contains(name) {
            continue;
        }
        // `unique` is never longer than `names`.
        let _ = unique.push(name.clone());
    }
    *names = unique;
}
