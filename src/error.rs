//! Error types for the recycle-bridge library.

use std::io;

use thiserror::Error;

/// The main error type for bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame or command text is not valid structured data.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The link could not be opened. Either the failure was not transient
    /// or every retry attempt was used up.
    #[error("failed to open {path} after {attempts} attempt(s): {source}")]
    LinkOpen {
        path: String,
        attempts: u32,
        #[source]
        source: tokio_serial::Error,
    },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Invalid or incomplete configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// Internal channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns true if a failed open is worth retrying.
///
/// Busy, locked and permission-denied ports usually clear once the previous
/// owner of the device lets go of it.
#[must_use]
pub fn is_transient(err: &tokio_serial::Error) -> bool {
    if let tokio_serial::ErrorKind::Io(kind) = err.kind() {
        if matches!(
            kind,
            io::ErrorKind::PermissionDenied
                | io::ErrorKind::ResourceBusy
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::AddrInUse
        ) {
            return true;
        }
    }

    let description = err.description.to_ascii_lowercase();
    ["busy", "lock", "temporarily unavailable", "permission denied"]
        .iter()
        .any(|needle| description.contains(needle))
}
