//! Socket seams for the portal's DNS and HTTP servers.
//!
//! The DNS responder and the HTTP workers are written against [`DatagramSocket`] and
//! [`Listener`]. [`UdpEndpoint`] and [`TcpListener`] implement them over `embassy-net` for
//! the device; host tests use in-memory fakes.

#![allow(async_fn_in_trait, reason = "single-threaded executor; futures need not be Send")]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_net::{
    Stack,
    tcp::{AcceptError, TcpSocket},
    udp::{RecvError, SendError, UdpMetadata, UdpSocket},
};
use embassy_time::{Duration, Timer};
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

use crate::{Error, Result};

/// A stalled client is dropped after this long without traffic.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_LINGER: Duration = Duration::from_millis(100);

/// A UDP socket.
pub trait DatagramSocket {
    /// Where a datagram came from, and where a reply goes.
    type Endpoint: Copy;

    /// Bind to `port` on every local address.
    fn bind(&mut self, port: u16) -> Result<()>;

    /// Receive one datagram into `buf`.
    ///
    /// Returns [`Error::WouldBlock`] when nothing is waiting; callers suspend and retry.
    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, Self::Endpoint)>;

    /// Send one datagram to `remote`.
    async fn send_to(&mut self, buf: &[u8], remote: Self::Endpoint) -> Result<()>;
}

/// One accepted TCP connection.
pub trait Connection: Read + Write {
    /// Flush pending output and close. Called exactly once per connection.
    async fn close(&mut self);
}

/// A TCP server socket that hands out one connection at a time.
pub trait Listener {
    /// The connection type, borrowing the listener while it is open.
    type Connection<'a>: Connection
    where
        Self: 'a;

    /// Start listening on `port`.
    fn listen(&mut self, port: u16) -> Result<()>;

    /// Wait for the next client.
    ///
    /// [`Error::ConnectionClosed`] means this client went away and the next accept may
    /// succeed. Any other error means the listener is unusable.
    async fn accept(&mut self) -> Result<Self::Connection<'_>>;
}

/// [`DatagramSocket`] over an `embassy-net` UDP socket.
pub struct UdpEndpoint<'a> {
    socket: UdpSocket<'a>,
}

impl<'a> UdpEndpoint<'a> {
    /// Wrap an unbound socket.
    #[must_use]
    pub const fn new(socket: UdpSocket<'a>) -> Self {
        Self { socket }
    }
}

impl DatagramSocket for UdpEndpoint<'_> {
    type Endpoint = UdpMetadata;

    fn bind(&mut self, port: u16) -> Result<()> {
        self.socket.bind(port).map_err(|_| Error::Bind(port))
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, UdpMetadata)> {
        self.socket.recv_from(buf).await.map_err(|err| match err {
            RecvError::Truncated => Error::DatagramTruncated,
            #[allow(unreachable_patterns, reason = "newer embassy-net versions add variants")]
            _ => Error::Io(ErrorKind::Other),
        })
    }

    async fn send_to(&mut self, buf: &[u8], remote: UdpMetadata) -> Result<()> {
        self.socket
            .send_to(buf, remote)
            .await
            .map_err(|err| match err {
                SendError::NoRoute => Error::Io(ErrorKind::AddrNotAvailable),
                SendError::SocketNotBound => Error::Io(ErrorKind::NotConnected),
                #[allow(unreachable_patterns, reason = "newer embassy-net versions add variants")]
                _ => Error::Io(ErrorKind::InvalidInput),
            })
    }
}

/// [`Listener`] over `embassy-net` TCP. A fresh socket is opened for every accept, so
/// nothing holds the port between connections or after the listener is dropped.
pub struct TcpListener<'a> {
    stack: Stack<'a>,
    rx_buffer: &'a mut [u8],
    tx_buffer: &'a mut [u8],
    port: Option<u16>,
}

impl<'a> TcpListener<'a> {
    /// Create a listener that uses the given socket buffers.
    #[must_use]
    pub const fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        Self {
            stack,
            rx_buffer,
            tx_buffer,
            port: None,
        }
    }
}

impl Listener for TcpListener<'_> {
    type Connection<'c>
        = TcpConnection<'c>
    where
        Self: 'c;

    fn listen(&mut self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(Error::Bind(port));
        }
        self.port = Some(port);
        Ok(())
    }

    async fn accept(&mut self) -> Result<TcpConnection<'_>> {
        let port = self.port.ok_or(Error::Bind(0))?;
        let mut socket = TcpSocket::new(self.stack, self.rx_buffer, self.tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        socket.accept(port).await.map_err(|err| match err {
            AcceptError::ConnectionReset => Error::ConnectionClosed,
            #[allow(unreachable_patterns, reason = "newer embassy-net versions add variants")]
            _ => Error::Bind(port),
        })?;
        Ok(TcpConnection { socket })
    }
}

/// An accepted `embassy-net` TCP connection.
pub struct TcpConnection<'a> {
    socket: TcpSocket<'a>,
}

impl ErrorType for TcpConnection<'_> {
    type Error = embassy_net::tcp::Error;
}

impl Read for TcpConnection<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

impl Write for TcpConnection<'_> {
    async fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> core::result::Result<(), Self::Error> {
        self.socket.flush().await
    }
}

impl Connection for TcpConnection<'_> {
    async fn close(&mut self) {
        if let Err(err) = self.socket.flush().await {
            debug!("Flush before close failed: {:?}", err);
        }
        self.socket.close();
        // Give the FIN a chance to leave before the socket is dropped.
        Timer::after(CLOSE_LINGER).await;
    }
}
