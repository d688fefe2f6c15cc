//! Configuration for [`WifiAuto`](crate::wifi_auto::WifiAuto).
//!
//! Everything has a default matching a bare device: the fallback network `ESP32` /
//! `password`, a portal on `10.0.0.1/24`, and ten-second join attempts.

use embassy_net::Ipv4Address;
use embassy_time::Duration;

use crate::credential_store::{NetworkName, Secret};
use crate::radio::AccessPointConfig;
use crate::{Error, Result};

/// Network tried when no profile is stored. Overridable at build time with `PORTAL_SSID`.
pub const DEFAULT_NETWORK_NAME: &str = match option_env!("PORTAL_SSID") {
    Some(name) => name,
    None => "ESP32",
};
/// Secret for [`DEFAULT_NETWORK_NAME`]. Overridable at build time with `PORTAL_PASS`.
pub const DEFAULT_SECRET: &str = match option_env!("PORTAL_PASS") {
    Some(secret) => secret,
    None => "password",
};

/// Delay between association polls.
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Polls before a join is abandoned.
pub const JOIN_POLL_BUDGET: u32 = 100;

/// Portal address; also gateway and DNS server for portal clients.
pub const PORTAL_ADDRESS: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
/// Portal subnet mask.
pub const PORTAL_NETMASK: Ipv4Address = Ipv4Address::new(255, 255, 255, 0);
/// DNS responder back-off when no datagram is waiting.
pub const DNS_IDLE_DELAY: Duration = Duration::from_millis(100);
/// How long after `/success` is served the portal shuts down.
pub const CLOSE_DELAY: Duration = Duration::from_millis(500);
/// HTTP worker back-off after a client vanished during accept.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long a single join may take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinPolicy {
    pub poll_interval: Duration,
    pub poll_budget: u32,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            poll_interval: JOIN_POLL_INTERVAL,
            poll_budget: JOIN_POLL_BUDGET,
        }
    }
}

/// Addressing and timing of the captive portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortalConfig {
    pub address: Ipv4Address,
    pub netmask: Ipv4Address,
    pub dns_idle_delay: Duration,
    pub close_delay: Duration,
    pub accept_retry_delay: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            address: PORTAL_ADDRESS,
            netmask: PORTAL_NETMASK,
            dns_idle_delay: DNS_IDLE_DELAY,
            close_delay: CLOSE_DELAY,
            accept_retry_delay: ACCEPT_RETRY_DELAY,
        }
    }
}

/// Everything [`WifiAuto`](crate::wifi_auto::WifiAuto) needs besides its radio and storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiAutoConfig {
    /// Profile tried when the store is empty.
    pub default_name: NetworkName,
    pub default_secret: Secret,
    /// Broadcast name of the portal network. `None` uses [`default_name`](Self::default_name).
    pub portal_ssid: Option<NetworkName>,
    pub join_policy: JoinPolicy,
    pub portal: PortalConfig,
}

impl Default for WifiAutoConfig {
    fn default() -> Self {
        Self {
            default_name: NetworkName::try_from(DEFAULT_NETWORK_NAME).unwrap_or_default(),
            default_secret: Secret::try_from(DEFAULT_SECRET).unwrap_or_default(),
            portal_ssid: None,
            join_policy: JoinPolicy::default(),
            portal: PortalConfig::default(),
        }
    }
}

impl WifiAutoConfig {
    /// Defaults, with a different fallback profile.
    pub fn new(default_name: &str, default_secret: &str) -> Result<Self> {
        Ok(Self {
            default_name: NetworkName::try_from(default_name).map_err(|()| Error::FormatError)?,
            default_secret: Secret::try_from(default_secret).map_err(|()| Error::FormatError)?,
            ..Self::default()
        })
    }

    /// Broadcast `ssid` while the portal runs.
    pub fn with_portal_ssid(mut self, ssid: &str) -> Result<Self> {
        self.portal_ssid = Some(NetworkName::try_from(ssid).map_err(|()| Error::FormatError)?);
        Ok(self)
    }

    #[must_use]
    pub const fn with_join_policy(mut self, join_policy: JoinPolicy) -> Self {
        self.join_policy = join_policy;
        self
    }

    #[must_use]
    pub const fn with_portal(mut self, portal: PortalConfig) -> Self {
        self.portal = portal;
        self
    }

    /// The access-point settings the portal applies.
    #[must_use]
    pub fn access_point(&self) -> AccessPointConfig {
        AccessPointConfig {
            address: self.portal.address,
            netmask: self.portal.netmask,
            ssid: self
                .portal_ssid
                .clone()
                .unwrap_or_else(|| self.default_name.clone()),
        }
    }
}
