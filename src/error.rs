use derive_more::derive::{Display, Error};

/// A specialized `Result` where the error is this crate's `Error` type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Define a unified error type for this crate.
#[allow(missing_docs, reason = "The variants are self-explanatory.")]
#[derive(Debug, Display, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // `#[error(not(source))]` below tells `derive_more` that the payload does not implement
    // `core::error::Error`; it is carried for logging only.
    #[cfg(feature = "wifi")]
    #[display("{_0:?}")]
    TaskSpawn(#[error(not(source))] embassy_executor::SpawnError),

    #[display("Network I/O failed: {_0:?}")]
    Io(#[error(not(source))] embedded_io_async::ErrorKind),

    #[display("Connection closed by peer")]
    ConnectionClosed,

    #[display("No datagram available")]
    WouldBlock,

    #[display("Datagram truncated")]
    DatagramTruncated,

    #[display("Request line or header too long")]
    RequestTooLarge,

    #[display("Malformed HTTP request")]
    MalformedRequest,

    #[display("Failed to bind port {_0}")]
    Bind(#[error(not(source))] u16),

    #[display("Radio operation failed")]
    Radio,

    #[display("Join rejected by radio (status {_0})")]
    JoinFailed(#[error(not(source))] u32),

    #[display("Format error")]
    FormatError,

    #[display("Credential storage is full")]
    StorageFull,

    #[display("Credential storage is invalid")]
    StorageCorrupted,

    #[cfg(any(feature = "pico1", feature = "pico2"))]
    #[display("Flash operation failed: {_0:?}")]
    Flash(#[error(not(source))] embassy_rp::flash::Error),
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Self::FormatError
    }
}

impl From<()> for Error {
    fn from(_: ()) -> Self {
        Self::FormatError
    }
}

#[cfg(feature = "wifi")]
impl From<embassy_executor::SpawnError> for Error {
    fn from(err: embassy_executor::SpawnError) -> Self {
        Self::TaskSpawn(err)
    }
}
