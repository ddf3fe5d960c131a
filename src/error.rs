//! Error types for the TN3270 client engine.

use std::fmt;
use std::io;
use std::error::Error as StdError;

/// Top-level error type for session operations.
#[derive(Debug)]
pub enum Error {
    /// A keyboard or DDM operation was attempted while `pwait` or
    /// `system_lock_wait` inhibit input.
    InputInhibited,
    /// An address fell outside `0..buffer_size`.
    BadAddress { address: usize, buffer_size: usize },
    /// Malformed address, WSF length, unknown command/order byte, or a bad
    /// DDM subcode. The session is marked lost.
    ProtocolViolation { detail: String },
    /// No registered codec could encode/decode the given byte or character.
    EncodingError { detail: String },
    /// The transport was closed by the peer or failed. The session is
    /// marked lost and its readiness event is set.
    TransportLost { reason: String },
    /// TLS upgrade failed during STARTTLS or initial connect.
    TlsNegotiationFailed { reason: String },
    /// A file-transfer error surfaced as the MSG text captured from the
    /// host at the end of an IND$FILE transfer.
    FileTransferError { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InputInhibited => write!(f, "input inhibited"),
            Error::BadAddress { address, buffer_size } =>
                write!(f, "address {address} out of range 0..{buffer_size}"),
            Error::ProtocolViolation { detail } =>
                write!(f, "protocol violation: {detail}"),
            Error::EncodingError { detail } =>
                write!(f, "encoding error: {detail}"),
            Error::TransportLost { reason } =>
                write!(f, "transport lost: {reason}"),
            Error::TlsNegotiationFailed { reason } =>
                write!(f, "TLS negotiation failed: {reason}"),
            Error::FileTransferError { message } =>
                write!(f, "file transfer error: {message}"),
        }
    }
}

impl StdError for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::TransportLost { reason: err.to_string() }
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::TlsNegotiationFailed { reason: err.to_string() }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_address_display() {
        let e = Error::BadAddress { address: 2000, buffer_size: 1920 };
        assert_eq!(e.to_string(), "address 2000 out of range 0..1920");
    }

    #[test]
    fn io_error_maps_to_transport_lost() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::TransportLost { .. }));
    }
}
</content>
