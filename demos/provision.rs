//! Join a stored WiFi network, or provision one through the captive portal.
//!
//! On first boot nothing is stored, so the device tries the build-time fallback network
//! and then raises an open access point. Join it from a phone, pick your network on the
//! page that pops up, and enter its password. The credentials are kept in flash, and the
//! next boot joins directly.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;
use defmt::*;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_rp::flash::{Blocking, Flash};
use embassy_time::Timer;
use panic_probe as _;
use wifi_portal::credential_store::CREDENTIALS_OBJECT;
use wifi_portal::cyw43_radio::Cyw43Radio;
use wifi_portal::flash_block::{FlashBlock, INTERNAL_FLASH_SIZE};
use wifi_portal::transport::{TcpListener, UdpEndpoint};
use wifi_portal::{Result, WifiAuto, WifiAutoConfig, WifiAutoEvent};

const HTTP_WORKERS: usize = 2;
const TCP_BUFFER_LEN: usize = 1024;
const UDP_BUFFER_LEN: usize = 512;

type Portal = WifiAuto<Cyw43Radio, FlashBlock<'static, embassy_rp::peripherals::FLASH>>;

// ============================================================================
// Main
// ============================================================================

#[embassy_executor::main]
pub async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    core::panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    info!("Starting WiFi provisioning demo");
    let p = embassy_rp::init(Default::default());

    let flash = Flash::<_, Blocking, INTERNAL_FLASH_SIZE>::new_blocking(p.FLASH);
    let storage = FlashBlock::new(flash, 0, CREDENTIALS_OBJECT);

    let (radio, stack) = Cyw43Radio::new(
        p.PIN_23, p.PIN_25, p.PIO0, p.PIN_24, p.PIN_29, p.DMA_CH0, spawner,
    )
    .await?;

    let wifi_auto: Portal = WifiAuto::new(radio, storage, WifiAutoConfig::default());

    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; UDP_BUFFER_LEN];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_buffer = [0u8; UDP_BUFFER_LEN];
    let dns_socket = UdpEndpoint::new(UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    ));

    let mut tcp_rx = [[0u8; TCP_BUFFER_LEN]; HTTP_WORKERS];
    let mut tcp_tx = [[0u8; TCP_BUFFER_LEN]; HTTP_WORKERS];
    let [rx0, rx1] = &mut tcp_rx;
    let [tx0, tx1] = &mut tcp_tx;
    let listeners = [
        TcpListener::new(stack, rx0, tx0),
        TcpListener::new(stack, rx1, tx1),
    ];

    let connected = match select(
        wifi_auto.ensure_connected(dns_socket, listeners),
        report_events(&wifi_auto),
    )
    .await
    {
        Either::First(result) => result?,
        Either::Second(never) => match never {},
    };
    if connected {
        info!("WiFi ready");
    } else {
        warn!("Captive portal closed without a working network");
    }

    loop {
        if let Some(config) = stack.config_v4() {
            info!("IP address: {}", config.address);
        }
        Timer::after_secs(60).await;
    }
}

async fn report_events(wifi_auto: &Portal) -> Infallible {
    loop {
        match wifi_auto.wait_event().await {
            WifiAutoEvent::Connecting {
                try_index,
                try_count,
            } => info!("Connecting ({}/{})", try_index + 1, try_count),
            WifiAutoEvent::Connected => info!("Connected"),
            WifiAutoEvent::ConnectionFailed => info!("No stored network reachable"),
            WifiAutoEvent::CaptivePortalReady => info!("Join the setup network to configure WiFi"),
            WifiAutoEvent::CaptivePortalClosed => info!("Setup network closed"),
        }
    }
}
