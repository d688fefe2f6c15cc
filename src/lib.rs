//! WiFi provisioning for Pico W class devices.
//!
//! Stored network profiles are tried first. When none can be joined, the device raises an
//! open access point with a DNS hijack and a small web form, collects a network name and
//! secret, proves them by joining, and saves them for next boot.
#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible in every module below.
#[macro_use]
mod fmt;

pub mod credential_store;
#[cfg(all(feature = "wifi", any(feature = "pico1", feature = "pico2")))]
pub mod cyw43_radio;
mod error;
#[cfg(any(feature = "pico1", feature = "pico2"))]
pub mod flash_block;
pub mod flash_record;
pub mod radio;
pub mod transport;
pub mod wifi_auto;
pub mod wifi_config;

// Re-export commonly used items
pub use credential_store::{CredentialStore, NetworkName, ProfileStorage, Secret};
pub use error::{Error, Result};
pub use radio::{AccessPointConfig, Radio};
pub use wifi_auto::{PortalState, WifiAuto, WifiAutoEvent};
pub use wifi_config::{JoinPolicy, PortalConfig, WifiAutoConfig};
