use thiserror::Error;

use crate::response::Response;

/// Error types returned by this crate.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The underlying byte stream failed while sending or receiving a
    /// packet.
    #[error("transport error ({0:?}): {1}")]
    Transport(std::io::ErrorKind, String),

    /// The peer closed the transport before a complete packet was read.
    #[error("transport closed mid-packet")]
    TransportClosed,

    /// The packet length field is smaller than the data the packet must
    /// carry, or the packet body ends before its fixed fields do.
    ///
    /// `length` is the advertised on-wire packet length and `expected` the
    /// minimum number of bytes this packet type occupies.
    #[error("malformed packet (length field {length}, expected at least {expected})")]
    MalformedPacket {
        /// The advertised total packet length.
        length: u16,

        /// The minimum length for this packet type.
        expected: usize,
    },

    /// A header chunk has a length field below the 3 byte minimum, extends
    /// past the end of the packet body, or carries a payload that does not
    /// decode as its type requires.
    #[error("malformed header 0x{id:02x}")]
    MalformedHeader {
        /// The identifier byte of the offending header.
        id: u8,
    },

    /// A single header chunk is too large to fit any packet bounded by the
    /// negotiated maximum packet length.
    ///
    /// Headers are never split across packets, so a header that cannot fit
    /// one packet cannot be sent at all.
    #[error("header 0x{id:02x} of {len} bytes cannot fit a {max} byte packet")]
    OversizedHeader {
        /// The identifier byte of the offending header.
        id: u8,

        /// The on-wire size of the header chunk.
        len: usize,

        /// The negotiated maximum packet length.
        max: u16,
    },

    /// A message was encoded for single-packet emission but does not fit
    /// the negotiated maximum packet length.
    #[error("message of {len} bytes exceeds the {max} byte packet limit")]
    OversizedMessage {
        /// The on-wire size of the full message.
        len: usize,

        /// The negotiated maximum packet length.
        max: u16,
    },

    /// The peer sent a packet that is well-formed but not permitted at this
    /// point of the exchange - for example, anything other than a GET_FINAL
    /// request between CONTINUE response chunks.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The peer answered the operation with a failure response.
    ///
    /// This is a normal protocol outcome rather than a transport or codec
    /// fault; the full response is carried for inspection.
    #[error("operation refused by peer: {0:?}")]
    Failure(Response),

    /// The peer announced a protocol version newer than this implementation
    /// speaks.
    #[error("unsupported protocol version {major}.{minor}")]
    VersionMismatch {
        /// The announced major version.
        major: u8,

        /// The announced minor version.
        minor: u8,
    },

    /// An operation was attempted on a session that is not connected, or
    /// was already torn down by a DISCONNECT.
    #[error("session is not connected")]
    NotConnected,
}

impl From<std::io::Error> for Error {
    fn from(v: std::io::Error) -> Self {
        match v.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::TransportClosed,
            kind => Self::Transport(kind, v.to_string()),
        }
    }
}
