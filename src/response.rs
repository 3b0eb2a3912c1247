//! OBEX response packets.

use byteorder::{BigEndian, WriteBytesExt};

use crate::header::{read_header_list, Header};
use crate::request::read_fixed;
use crate::transport::ObexStream;
use crate::version::ObexVersion;
use crate::{packet, Error};

pub(crate) const CODE_CONTINUE: u8 = 0x90;
pub(crate) const CODE_SUCCESS: u8 = 0xa0;
pub(crate) const CODE_BAD_REQUEST: u8 = 0xc0;
pub(crate) const CODE_UNAUTHORIZED: u8 = 0xc1;
pub(crate) const CODE_FORBIDDEN: u8 = 0xc3;
pub(crate) const CODE_NOT_FOUND: u8 = 0xc4;
pub(crate) const CODE_PRECONDITION_FAILED: u8 = 0xcc;

/// The response type.
///
/// Opcode 0xA0 is SUCCESS everywhere except in the reply to a CONNECT,
/// where it additionally carries the server's version, flags and maximum
/// packet length. The two cannot be told apart from the opcode alone, so
/// decoding has two entry points: [`Response::read_from`] for the general
/// case and [`Response::read_connect_reply`] for the packet answering a
/// CONNECT.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// CONTINUE (0x90): the logical response continues in further packets.
    Continue,

    /// SUCCESS (0xA0).
    Success,

    /// SUCCESS (0xA0) answering a CONNECT, with the server's negotiation
    /// fields.
    ConnectSuccess {
        /// The server's protocol version.
        version: ObexVersion,

        /// The CONNECT flag byte.
        flags: u8,

        /// The largest packet the server accepts.
        max_packet_length: u16,
    },

    /// Bad-Request (0xC0).
    BadRequest,

    /// Unauthorized (0xC1).
    Unauthorized,

    /// Forbidden (0xC3).
    Forbidden,

    /// Not-Found (0xC4).
    NotFound,

    /// Precondition-Failed (0xCC).
    PreconditionFailed,

    /// A response opcode unknown to this library, kept raw.
    Unknown {
        /// The opcode byte.
        opcode: u8,

        /// The packet body after the 3 byte prefix.
        data: Vec<u8>,
    },
}

impl ResponseKind {
    /// Returns the opcode byte for this response type.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Continue => CODE_CONTINUE,
            Self::Success | Self::ConnectSuccess { .. } => CODE_SUCCESS,
            Self::BadRequest => CODE_BAD_REQUEST,
            Self::Unauthorized => CODE_UNAUTHORIZED,
            Self::Forbidden => CODE_FORBIDDEN,
            Self::NotFound => CODE_NOT_FOUND,
            Self::PreconditionFailed => CODE_PRECONDITION_FAILED,
            Self::Unknown { opcode, .. } => *opcode,
        }
    }

    /// Serialises the fixed fields (present on `ConnectSuccess` only).
    fn fixed_fields(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Self::ConnectSuccess {
            version,
            flags,
            max_packet_length,
        } = self
        {
            buf.push(version.to_byte());
            buf.push(*flags);
            buf.extend_from_slice(&max_packet_length.to_be_bytes());
        }
        buf
    }

    /// Maps a known response opcode to its (field-free) kind.
    fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            CODE_CONTINUE => Some(Self::Continue),
            CODE_SUCCESS => Some(Self::Success),
            CODE_BAD_REQUEST => Some(Self::BadRequest),
            CODE_UNAUTHORIZED => Some(Self::Unauthorized),
            CODE_FORBIDDEN => Some(Self::Forbidden),
            CODE_NOT_FOUND => Some(Self::NotFound),
            CODE_PRECONDITION_FAILED => Some(Self::PreconditionFailed),
            _ => None,
        }
    }
}

/// An OBEX response: a [`ResponseKind`] plus an ordered header list.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    kind: ResponseKind,
    headers: Vec<Header>,
}

impl Response {
    /// Construct a new response with an empty header list.
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            headers: Vec::new(),
        }
    }

    /// The response type and its fixed fields.
    pub fn kind(&self) -> &ResponseKind {
        &self.kind
    }

    /// The opcode byte this response is framed with.
    pub fn opcode(&self) -> u8 {
        self.kind.opcode()
    }

    /// The ordered header list.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Appends a header unconditionally.
    ///
    /// Sizing is the encoder's concern: a response that outgrows the
    /// negotiated packet length is split by
    /// [`encode_chunks`](Response::encode_chunks).
    pub fn push_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Removes and returns the header list.
    pub fn take_headers(&mut self) -> Vec<Header> {
        std::mem::take(&mut self.headers)
    }

    /// True for CONTINUE.
    pub fn is_continue(&self) -> bool {
        matches!(self.kind, ResponseKind::Continue)
    }

    /// True for SUCCESS in either form.
    pub fn is_success(&self) -> bool {
        matches!(
            self.kind,
            ResponseKind::Success | ResponseKind::ConnectSuccess { .. }
        )
    }

    /// True for the failure responses (and unknown opcodes, which cannot be
    /// anything else).
    pub fn is_failure(&self) -> bool {
        !self.is_success() && !self.is_continue()
    }

    /// Returns the on-wire size of this response as a single packet.
    pub fn serialised_len(&self) -> usize {
        let body = match &self.kind {
            ResponseKind::Unknown { data, .. } => data.len(),
            kind => {
                kind.fixed_fields().len()
                    + self.headers.iter().map(Header::serialised_len).sum::<usize>()
            }
        };
        packet::PACKET_PREFIX_LEN + body
    }

    /// Encodes this response as exactly one packet of at most `max_packet`
    /// bytes.
    pub fn encode(&self, max_packet: u16) -> Result<Vec<u8>, Error> {
        let mut chunks = self.encode_parts(max_packet, false)?;
        Ok(chunks.swap_remove(0))
    }

    /// Encodes this response as one or more packets, each at most
    /// `max_packet` bytes.
    ///
    /// Every buffer except the last carries the CONTINUE opcode; the last
    /// carries this response's own opcode. Headers are never split across
    /// buffers.
    pub fn encode_chunks(&self, max_packet: u16) -> Result<Vec<Vec<u8>>, Error> {
        self.encode_parts(max_packet, true)
    }

    fn encode_parts(&self, max_packet: u16, multi_part: bool) -> Result<Vec<Vec<u8>>, Error> {
        if let ResponseKind::Unknown { opcode, data } = &self.kind {
            let len = packet::PACKET_PREFIX_LEN + data.len();
            if len > max_packet as usize {
                return Err(Error::OversizedMessage {
                    len,
                    max: max_packet,
                });
            }

            let mut buf = Vec::with_capacity(len);
            buf.write_u8(*opcode)?;
            buf.write_u16::<BigEndian>(len as u16)?;
            buf.extend_from_slice(data);
            return Ok(vec![buf]);
        }

        packet::encode_chunks(
            self.opcode(),
            &self.kind.fixed_fields(),
            &self.headers,
            max_packet,
            multi_part,
        )
    }

    /// Constructs a `Response` from a packet opcode and body, with no
    /// fixed-field inference: 0xA0 is plain SUCCESS.
    pub fn from_packet(opcode: u8, body: &[u8]) -> Result<Self, Error> {
        match ResponseKind::from_opcode(opcode) {
            Some(kind) => Ok(Self {
                kind,
                headers: read_header_list(body)?,
            }),
            None => Ok(Self {
                kind: ResponseKind::Unknown {
                    opcode,
                    data: body.to_vec(),
                },
                headers: Vec::new(),
            }),
        }
    }

    /// Constructs a `Response` from the packet answering a CONNECT.
    ///
    /// Every known response to a CONNECT carries the version, flags and
    /// max-packet fixed fields ahead of its headers; 0xA0 decodes to
    /// [`ResponseKind::ConnectSuccess`]. A bare 3 byte failure reply
    /// without the fields is tolerated.
    pub fn from_connect_reply(opcode: u8, body: &[u8]) -> Result<Self, Error> {
        let Some(kind) = ResponseKind::from_opcode(opcode) else {
            return Ok(Self {
                kind: ResponseKind::Unknown {
                    opcode,
                    data: body.to_vec(),
                },
                headers: Vec::new(),
            });
        };

        if body.is_empty() && opcode != CODE_SUCCESS {
            return Ok(Self {
                kind,
                headers: Vec::new(),
            });
        }

        let fixed = read_fixed::<4>(body)?;
        let kind = match kind {
            ResponseKind::Success => ResponseKind::ConnectSuccess {
                version: ObexVersion::from_byte(fixed[0]),
                flags: fixed[1],
                max_packet_length: u16::from_be_bytes([fixed[2], fixed[3]]),
            },
            other => other,
        };

        Ok(Self {
            kind,
            headers: read_header_list(&body[4..])?,
        })
    }

    /// Reads one packet from `stream` and decodes it as a response.
    pub fn read_from(stream: &mut dyn ObexStream) -> Result<Self, Error> {
        let (opcode, body) = packet::read(stream)?;
        Self::from_packet(opcode, &body)
    }

    /// Reads one packet from `stream` and decodes it as the reply to a
    /// CONNECT request.
    pub fn read_connect_reply(stream: &mut dyn ObexStream) -> Result<Self, Error> {
        let (opcode, body) = packet::read(stream)?;
        Self::from_connect_reply(opcode, &body)
    }
}
