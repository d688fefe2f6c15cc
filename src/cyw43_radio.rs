//! [`Radio`] for the CYW43439 on the Pico W and Pico 2 W.
//!
//! The chip exposes one network interface to `embassy-net`. While the access point is up
//! the stack carries the portal's static address and a DHCP server runs for portal
//! clients; otherwise it runs a DHCP client for the station side.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use cyw43::{JoinOptions, ScanOptions};
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use embassy_executor::Spawner;
use embassy_futures::select::select;
use embassy_net::{Config, ConfigV4, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;

use crate::radio::{AccessPointConfig, Radio, ScanResults, network_name_from_bytes};
use crate::wifi_auto::dhcp::run_dhcp_server;
use crate::{Error, Result};

const AP_CHANNEL: u8 = 1;
const SOCKET_COUNT: usize = 8;
const RANDOM_SEED: u64 = 0x7c8f_3a2e_9d14_6b5a;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

/// Starts and stops the portal's DHCP server task.
struct DhcpControl {
    start: Signal<CriticalSectionRawMutex, AccessPointConfig>,
    stop: Signal<CriticalSectionRawMutex, ()>,
}

static DHCP_CONTROL: DhcpControl = DhcpControl {
    start: Signal::new(),
    stop: Signal::new(),
};

/// CYW43 station and access point over one `embassy-net` stack.
pub struct Cyw43Radio {
    control: cyw43::Control<'static>,
    stack: Stack<'static>,
    access_point: Option<AccessPointConfig>,
    access_point_active: bool,
    joined: bool,
}

impl Cyw43Radio {
    /// Power up the chip, start the network stack, and spawn the driver tasks.
    ///
    /// Call once. The returned stack is what the portal's sockets are built on.
    pub async fn new(
        pin_23: Peri<'static, PIN_23>,
        pin_25: Peri<'static, PIN_25>,
        pio0: Peri<'static, PIO0>,
        pin_24: Peri<'static, PIN_24>,
        pin_29: Peri<'static, PIN_29>,
        dma_ch0: Peri<'static, DMA_CH0>,
        spawner: Spawner,
    ) -> Result<(Self, Stack<'static>)> {
        let fw = cyw43_firmware::CYW43_43439A0;
        let clm = cyw43_firmware::CYW43_43439A0_CLM;

        let pwr = Output::new(pin_23, Level::Low);
        let cs = Output::new(pin_25, Level::High);
        let mut pio = Pio::new(pio0, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            cs,
            pin_24,
            pin_29,
            dma_ch0,
        );

        static STATE: StaticCell<cyw43::State> = StaticCell::new();
        let state = STATE.init(cyw43::State::new());
        let (net_device, mut control, runner) = cyw43::new(state, pwr, spi, fw).await;
        spawner.spawn(wifi_task(runner)?);

        control.init(clm).await;
        control
            .set_power_management(cyw43::PowerManagementMode::PowerSave)
            .await;

        static RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();
        let (stack, runner) = embassy_net::new(
            net_device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            RANDOM_SEED,
        );
        spawner.spawn(net_task(runner)?);
        spawner.spawn(dhcp_task(stack)?);

        info!("CYW43 radio ready");
        Ok((
            Self {
                control,
                stack,
                access_point: None,
                access_point_active: false,
                joined: false,
            },
            stack,
        ))
    }
}

impl Radio for Cyw43Radio {
    async fn join(&mut self, name: &str, secret: &str) -> Result<()> {
        if !self.access_point_active {
            self.stack.set_config_v4(ConfigV4::Dhcp(Default::default()));
        }
        self.control
            .join(name, JoinOptions::new(secret.as_bytes()))
            .await
            .map_err(|err| Error::JoinFailed(err.status))?;
        self.joined = true;
        Ok(())
    }

    fn is_joined(&self) -> bool {
        // With the access point up the stack keeps the portal address, so association is
        // all there is to wait for.
        self.joined && (self.access_point_active || self.stack.is_config_up())
    }

    async fn disconnect(&mut self) {
        if self.joined {
            self.control.leave().await;
            self.joined = false;
        }
    }

    async fn scan(&mut self) -> Result<ScanResults> {
        let mut results = ScanResults::new();
        let mut scanner = self.control.scan(ScanOptions::default()).await;
        while let Some(bss) = scanner.next().await {
            let len = usize::from(bss.ssid_len).min(bss.ssid.len());
            let Some(name) = network_name_from_bytes(&bss.ssid[..len]) else {
                continue;
            };
            if results.contains(&name) {
                continue;
            }
            if results.push(name).is_err() {
                break;
            }
        }
        Ok(results)
    }

    async fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<()> {
        self.access_point = Some(config.clone());
        Ok(())
    }

    async fn set_access_point_active(&mut self, active: bool) -> Result<()> {
        if active == self.access_point_active {
            return Ok(());
        }
        if !active {
            DHCP_CONTROL.stop.signal(());
            self.control.close_ap().await;
            self.stack.set_config_v4(ConfigV4::Dhcp(Default::default()));
            self.access_point_active = false;
            info!("Access point stopped");
            return Ok(());
        }

        let config = self.access_point.clone().ok_or(Error::Radio)?;
        let mut dns_servers = heapless::Vec::new();
        dns_servers.push(config.dns_server()).map_err(|_| Error::Radio)?;
        self.stack.set_config_v4(ConfigV4::Static(StaticConfigV4 {
            address: Ipv4Cidr::new(config.address, config.prefix_len()),
            gateway: Some(config.gateway()),
            dns_servers,
        }));
        self.control.start_ap_open(&config.ssid, AP_CHANNEL).await;
        DHCP_CONTROL.start.signal(config);
        self.access_point_active = true;
        info!("Access point started");
        Ok(())
    }
}

#[embassy_executor::task]
async fn wifi_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}

/// Runs the portal DHCP server whenever the access point is up.
#[embassy_executor::task]
async fn dhcp_task(stack: Stack<'static>) -> ! {
    loop {
        let access_point = DHCP_CONTROL.start.wait().await;
        DHCP_CONTROL.stop.reset();
        select(run_dhcp_server(stack, &access_point), DHCP_CONTROL.stop.wait()).await;
        info!("DHCP server stopped");
    }
}
