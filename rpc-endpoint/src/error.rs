//! Error types for endpoint operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::wire::WireError;

/// Error returned by a message handler.
///
/// Handlers are expected to encode their own failures into a response.
/// Returning this is treated as a bug: it is logged and the message is
/// left unanswered.
pub type HandlerError = Box<dyn std::error::Error>;

/// Reasons a connection ends, or an endpoint refuses to run.
#[derive(Error, Debug)]
pub enum EndpointError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer violated the wire protocol.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Nothing was heard from the peer for too long.
    #[error("no keepalive received from peer in {elapsed:?}")]
    KeepaliveTimeout {
        /// Time since the last keepalive (or handshake) arrived.
        elapsed: Duration,
    },

    /// `run()` was called more than once on the same endpoint.
    #[error("endpoint run() called more than once")]
    AlreadyRun,
}

impl EndpointError {
    /// Whether this is an ordinary way for a connection to end.
    ///
    /// Peer EOF or reset and keepalive timeouts are expected. Protocol
    /// violations and any other I/O failure are not.
    pub fn is_expected(&self) -> bool {
        match self {
            EndpointError::Io(error) => is_expected_io_error(error),
            EndpointError::KeepaliveTimeout { .. } => true,
            EndpointError::Wire(_) | EndpointError::AlreadyRun => false,
        }
    }
}

/// Whether an I/O error just means the connection went away.
pub(crate) fn is_expected_io_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
    )
}

/// Error surfaced to callers of `send_message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommunicationError {
    /// No response arrived within the timeout.
    #[error("no response within {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The endpoint closed while the message was outstanding.
    #[error("endpoint closed before a response arrived")]
    Closed,

    /// The payload cannot be carried to this peer.
    ///
    /// This is a usage error: it never closes the endpoint.
    #[error("message of {size} bytes exceeds the {max} byte limit of peer protocol {peer_protocol}")]
    MessageTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Largest payload the peer accepts.
        max: usize,
        /// Protocol version advertised by the peer.
        peer_protocol: u32,
    },

    /// All 65536 message ids are awaiting responses.
    #[error("too many messages in flight")]
    TooManyInFlight,
}

impl CommunicationError {
    /// Whether this failure says something about channel health.
    pub(crate) fn indicates_unhealthy_channel(&self) -> bool {
        !matches!(
            self,
            CommunicationError::MessageTooLarge { .. } | CommunicationError::TooManyInFlight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_classification() {
        let eof = EndpointError::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(eof.is_expected());

        let reset = EndpointError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(reset.is_expected());

        let keepalive = EndpointError::KeepaliveTimeout {
            elapsed: Duration::from_secs(31),
        };
        assert!(keepalive.is_expected());

        let other = EndpointError::Io(io::Error::other("disk on fire"));
        assert!(!other.is_expected());

        let wire = EndpointError::Wire(WireError::UnknownPacketType(9));
        assert!(!wire.is_expected());
    }

    #[test]
    fn test_communication_error_display() {
        assert_eq!(
            CommunicationError::Closed.to_string(),
            "endpoint closed before a response arrived"
        );
        let too_large = CommunicationError::MessageTooLarge {
            size: 70_000,
            max: 65_535,
            peer_protocol: 1,
        };
        assert!(too_large.to_string().contains("70000"));
        assert!(!too_large.indicates_unhealthy_channel());
        assert!(CommunicationError::Timeout {
            timeout: Duration::from_secs(1)
        }
        .indicates_unhealthy_channel());
    }
}
