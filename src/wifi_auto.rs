//! WiFi auto-provisioning: join a stored network, or fall back to a captive portal that
//! collects credentials.
//!
//! [`WifiAuto`] owns the radio and the credential store. [`WifiAuto::connect`] tries the
//! stored profiles; [`WifiAuto::run_captive_portal`] brings up an open access point with a
//! DNS hijack and a small web form, and returns once a submitted network has been joined
//! and saved. [`WifiAuto::ensure_connected`] does the first and, if needed, the second.

#![allow(clippy::future_not_send, reason = "single-threaded")]

pub mod connection;
pub mod dhcp;
pub mod dns;
pub mod http;
pub mod portal;

use core::cell::Cell;
use core::convert::Infallible;

use embassy_futures::select::{Either3, select_array, select3};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use self::dns::{DNS_PORT, run_dns_responder};
use self::http::HTTP_PORT;
use crate::credential_store::{CredentialStore, ProfileStorage};
use crate::radio::Radio;
use crate::transport::{Connection as _, DatagramSocket, Listener};
use crate::wifi_config::WifiAutoConfig;
use crate::{Error, Result};

/// Events emitted while connecting or provisioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiAutoEvent {
    /// About to try profile `try_index` of `try_count`.
    Connecting { try_index: usize, try_count: usize },
    Connected,
    ConnectionFailed,
    CaptivePortalReady,
    CaptivePortalClosed,
}

/// Latest-value channel carrying [`WifiAutoEvent`]s.
pub type WifiAutoEvents = Signal<CriticalSectionRawMutex, WifiAutoEvent>;

/// Lifecycle of the captive portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortalState {
    #[default]
    Idle,
    ApStarting,
    PortalRunning,
    Closing,
}

/// State shared by the portal's HTTP workers for one portal run.
pub(crate) struct PortalSession {
    close: Signal<NoopRawMutex, ()>,
    connected: Cell<bool>,
}

impl PortalSession {
    const fn new() -> Self {
        Self {
            close: Signal::new(),
            connected: Cell::new(false),
        }
    }

    /// Ask for the portal to shut down once the close delay has passed.
    pub(crate) fn request_close(&self) {
        self.close.signal(());
    }

    pub(crate) fn mark_connected(&self) {
        self.connected.set(true);
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    async fn closed(&self, config: &WifiAutoConfig) {
        self.close.wait().await;
        Timer::after(config.portal.close_delay).await;
    }
}

/// Owns the radio and the credential store, and decides between stored profiles and the
/// captive portal.
pub struct WifiAuto<R, S> {
    radio: Mutex<NoopRawMutex, R>,
    store: Mutex<NoopRawMutex, CredentialStore<S>>,
    config: WifiAutoConfig,
    events: WifiAutoEvents,
    portal_state: Cell<PortalState>,
}

impl<R: Radio, S: ProfileStorage> WifiAuto<R, S> {
    #[must_use]
    pub fn new(radio: R, storage: S, config: WifiAutoConfig) -> Self {
        Self {
            radio: Mutex::new(radio),
            store: Mutex::new(CredentialStore::new(storage)),
            config,
            events: Signal::new(),
            portal_state: Cell::new(PortalState::Idle),
        }
    }

    pub fn config(&self) -> &WifiAutoConfig {
        &self.config
    }

    pub fn portal_state(&self) -> PortalState {
        self.portal_state.get()
    }

    pub fn events(&self) -> &WifiAutoEvents {
        &self.events
    }

    /// Wait for the next event.
    pub async fn wait_event(&self) -> WifiAutoEvent {
        self.events.wait().await
    }

    /// Put the radio in a known state, then try the stored profiles.
    pub async fn connect(&self) -> bool {
        {
            let mut radio = self.radio.lock().await;
            radio.disconnect().await;
            if let Err(err) = radio.set_access_point_active(false).await {
                warn!("Could not stop access point: {:?}", err);
            }
        }
        let connected = self.attempt_all().await;
        self.events.signal(if connected {
            WifiAutoEvent::Connected
        } else {
            WifiAutoEvent::ConnectionFailed
        });
        connected
    }

    /// [`connect`](Self::connect) for callers outside an async context.
    pub fn connect_blocking(&self) -> bool {
        embassy_futures::block_on(self.connect())
    }

    /// Connect with stored credentials, running the captive portal if that fails.
    ///
    /// Returns whether the station ended up joined.
    pub async fn ensure_connected<D, L, const N: usize>(
        &self,
        dns_socket: D,
        listeners: [L; N],
    ) -> Result<bool>
    where
        D: DatagramSocket,
        L: Listener,
    {
        if self.connect().await {
            return Ok(true);
        }
        info!("No WiFi credentials found or failed to connect. Starting captive portal...");
        self.run_captive_portal(dns_socket, listeners).await
    }

    /// Run the captive portal until a visitor loads `/success` or an HTTP worker fails.
    ///
    /// The access point is configured and raised, `dns_socket` answers every lookup with
    /// the portal address, and each of the `N` listeners serves one client at a time on
    /// port 80. On the way out the sockets are dropped and the access point is lowered.
    ///
    /// Returns `Ok(true)` when a submitted network was joined and saved during this run.
    pub async fn run_captive_portal<D, L, const N: usize>(
        &self,
        mut dns_socket: D,
        mut listeners: [L; N],
    ) -> Result<bool>
    where
        D: DatagramSocket,
        L: Listener,
    {
        self.set_portal_state(PortalState::ApStarting);
        if let Err(err) = self.start_portal(&mut dns_socket, &mut listeners).await {
            error!("Captive portal failed to start: {:?}", err);
            self.stop_access_point().await;
            self.set_portal_state(PortalState::Idle);
            return Err(err);
        }

        let session = PortalSession::new();
        self.set_portal_state(PortalState::PortalRunning);
        self.events.signal(WifiAutoEvent::CaptivePortalReady);
        info!(
            "Captive portal running at {:?}",
            self.config.portal.address.octets()
        );

        let outcome = select3(
            run_dns_responder(
                &mut dns_socket,
                self.config.portal.address,
                self.config.portal.dns_idle_delay,
            ),
            select_array(
                listeners
                    .each_mut()
                    .map(|listener| self.serve(listener, &session)),
            ),
            session.closed(&self.config),
        )
        .await;

        self.set_portal_state(PortalState::Closing);
        let result = match outcome {
            Either3::First(never) => match never {},
            Either3::Second((Ok(never), _)) => match never {},
            Either3::Second((Err(err), worker)) => {
                error!("HTTP worker {} stopped: {:?}", worker, err);
                Err(err)
            }
            Either3::Third(()) => {
                info!("Captive portal closing");
                Ok(session.is_connected())
            }
        };

        drop(dns_socket);
        drop(listeners);
        self.stop_access_point().await;
        self.set_portal_state(PortalState::Idle);
        self.events.signal(WifiAutoEvent::CaptivePortalClosed);
        result
    }

    /// Give back the radio and the credential store.
    pub fn into_parts(self) -> (R, CredentialStore<S>) {
        (self.radio.into_inner(), self.store.into_inner())
    }

    async fn start_portal<D: DatagramSocket, L: Listener>(
        &self,
        dns_socket: &mut D,
        listeners: &mut [L],
    ) -> Result<()> {
        let access_point = self.config.access_point();
        {
            let mut radio = self.radio.lock().await;
            radio.configure_access_point(&access_point).await?;
            radio.set_access_point_active(true).await?;
        }
        info!("Access point {} is up", access_point.ssid.as_str());
        dns_socket.bind(DNS_PORT)?;
        for listener in listeners.iter_mut() {
            listener.listen(HTTP_PORT)?;
        }
        Ok(())
    }

    async fn stop_access_point(&self) {
        if let Err(err) = self.radio.lock().await.set_access_point_active(false).await {
            warn!("Could not stop access point: {:?}", err);
        }
    }

    /// One HTTP worker: accept, handle, close, repeat.
    async fn serve<L: Listener>(&self, listener: &mut L, session: &PortalSession) -> Result<Infallible> {
        loop {
            let mut conn = match listener.accept().await {
                Ok(conn) => conn,
                Err(Error::ConnectionClosed) => {
                    warn!("Client went away before accept completed");
                    Timer::after(self.config.portal.accept_retry_delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Err(err) = self.handle_connection(&mut conn, session).await {
                warn!("HTTP connection error: {:?}", err);
            }
            conn.close().await;
        }
    }

    fn set_portal_state(&self, state: PortalState) {
        debug!("Portal state: {:?}", state);
        self.portal_state.set(state);
    }
}
