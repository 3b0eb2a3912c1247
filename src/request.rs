//! OBEX request packets.

use bitflags::bitflags;
use byteorder::{BigEndian, WriteBytesExt};

use crate::header::{read_header_list, Header};
use crate::transport::ObexStream;
use crate::version::ObexVersion;
use crate::{packet, Error};

pub(crate) const CODE_CONNECT: u8 = 0x80;
pub(crate) const CODE_DISCONNECT: u8 = 0x81;
pub(crate) const CODE_PUT: u8 = 0x02;
pub(crate) const CODE_PUT_FINAL: u8 = 0x82;
pub(crate) const CODE_GET: u8 = 0x03;
pub(crate) const CODE_GET_FINAL: u8 = 0x83;
pub(crate) const CODE_SET_PATH: u8 = 0x85;
pub(crate) const CODE_ABORT: u8 = 0xff;

/// Bit 7 of a request opcode: set on the last packet of a request sequence.
const FINAL_BIT: u8 = 0x80;

bitflags! {
    /// The SETPATH flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SetPathFlags: u8 {
        /// Move to the parent directory before applying any name.
        const NAVIGATE_TO_PARENT = 0x01;

        /// Do not create the named directory if it does not exist.
        const DONT_CREATE_DIR = 0x02;
    }
}

/// The request type, carrying the opcode-specific fixed fields.
///
/// `PUT` and `GET` exist in non-final and final forms; the non-final form
/// signals that more packets of the same logical request follow.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// CONNECT (0x80): opens a session, announcing the client's protocol
    /// version and the largest packet it is willing to receive.
    Connect {
        /// The client's protocol version.
        version: ObexVersion,

        /// The CONNECT flag byte (no flags are defined; issued as 0).
        flags: u8,

        /// The largest packet the client accepts.
        max_packet_length: u16,
    },

    /// DISCONNECT (0x81): tears the session down.
    Disconnect,

    /// PUT (0x02): one non-final packet of an object push.
    Put,

    /// PUT_FINAL (0x82): the last packet of an object push.
    PutFinal,

    /// GET (0x03): one non-final packet of an object fetch.
    Get,

    /// GET_FINAL (0x83): the last packet of an object fetch, also sent bare
    /// to pull further response chunks.
    GetFinal,

    /// SETPATH (0x85): changes the server's current directory.
    SetPath {
        /// Navigation flags.
        flags: SetPathFlags,

        /// The SETPATH constants byte (reserved; issued as 0).
        constants: u8,
    },

    /// ABORT (0xFF): cancels the operation in progress.
    Abort,

    /// A request opcode unknown to this library.
    ///
    /// The fixed-field layout of an unknown opcode cannot be inferred, so
    /// the packet body is kept raw for exact round-tripping.
    Unknown {
        /// The opcode byte.
        opcode: u8,

        /// The packet body after the 3 byte prefix.
        data: Vec<u8>,
    },
}

impl RequestKind {
    /// Returns the opcode byte for this request type.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Connect { .. } => CODE_CONNECT,
            Self::Disconnect => CODE_DISCONNECT,
            Self::Put => CODE_PUT,
            Self::PutFinal => CODE_PUT_FINAL,
            Self::Get => CODE_GET,
            Self::GetFinal => CODE_GET_FINAL,
            Self::SetPath { .. } => CODE_SET_PATH,
            Self::Abort => CODE_ABORT,
            Self::Unknown { opcode, .. } => *opcode,
        }
    }

    /// Serialises the opcode-specific fixed fields (empty for most kinds).
    fn fixed_fields(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::Connect {
                version,
                flags,
                max_packet_length,
            } => {
                buf.push(version.to_byte());
                buf.push(*flags);
                buf.extend_from_slice(&max_packet_length.to_be_bytes());
            }
            Self::SetPath { flags, constants } => {
                buf.push(flags.bits());
                buf.push(*constants);
            }
            _ => {}
        }
        buf
    }
}

/// An OBEX request: a [`RequestKind`] plus an ordered header list.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    kind: RequestKind,
    headers: Vec<Header>,
}

impl Request {
    /// Construct a new request with an empty header list.
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            headers: Vec::new(),
        }
    }

    /// The request type and its fixed fields.
    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// The opcode byte this request is framed with.
    pub fn opcode(&self) -> u8 {
        self.kind.opcode()
    }

    /// True when the final bit (bit 7) of the opcode is set.
    pub fn is_final(&self) -> bool {
        self.opcode() & FINAL_BIT != 0
    }

    /// The ordered header list.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Appends a header unconditionally.
    pub fn push_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Appends a header if the request still fits a `max_packet` byte
    /// packet with it, returning whether it was added.
    ///
    /// On `false` the request is left unchanged; the caller keeps the
    /// header for the next packet.
    pub fn add_header(&mut self, header: &Header, max_packet: u16) -> bool {
        if self.serialised_len() + header.serialised_len() > max_packet as usize {
            return false;
        }

        self.headers.push(header.clone());
        true
    }

    /// Clears the header list, keeping the opcode and fixed fields.
    pub fn reset_headers(&mut self) {
        self.headers.clear();
    }

    /// Removes and returns the header list.
    pub fn take_headers(&mut self) -> Vec<Header> {
        std::mem::take(&mut self.headers)
    }

    /// Returns the value of the first `Name` header, if any.
    pub fn name(&self) -> Option<&str> {
        self.headers.iter().find_map(|h| match h {
            Header::Name(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Promotes a non-final `PUT`/`GET` into its final form.
    ///
    /// Used when the packet being assembled turns out to be the last of its
    /// request sequence.
    pub fn finalise(&mut self) {
        self.kind = match self.kind {
            RequestKind::Put => RequestKind::PutFinal,
            RequestKind::Get => RequestKind::GetFinal,
            ref other => other.clone(),
        };
    }

    /// Returns the on-wire size of this request as a single packet.
    pub fn serialised_len(&self) -> usize {
        let body = match &self.kind {
            RequestKind::Unknown { data, .. } => data.len(),
            kind => {
                kind.fixed_fields().len()
                    + self.headers.iter().map(Header::serialised_len).sum::<usize>()
            }
        };
        packet::PACKET_PREFIX_LEN + body
    }

    /// Encodes this request as exactly one packet of at most `max_packet`
    /// bytes.
    pub fn encode(&self, max_packet: u16) -> Result<Vec<u8>, Error> {
        if let RequestKind::Unknown { opcode, data } = &self.kind {
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
            return Ok(buf);
        }

        let mut chunks = packet::encode_chunks(
            self.opcode(),
            &self.kind.fixed_fields(),
            &self.headers,
            max_packet,
            false,
        )?;

        // encode_chunks returns exactly one buffer for multi_part = false.
        Ok(chunks.swap_remove(0))
    }

    /// Constructs a `Request` from a packet opcode and body (the bytes
    /// after the 3 byte prefix).
    pub fn from_packet(opcode: u8, body: &[u8]) -> Result<Self, Error> {
        let (kind, header_data) = match opcode {
            CODE_CONNECT => {
                let fixed = read_fixed::<4>(body)?;
                (
                    RequestKind::Connect {
                        version: ObexVersion::from_byte(fixed[0]),
                        flags: fixed[1],
                        max_packet_length: u16::from_be_bytes([fixed[2], fixed[3]]),
                    },
                    &body[4..],
                )
            }
            CODE_SET_PATH => {
                let fixed = read_fixed::<2>(body)?;
                (
                    RequestKind::SetPath {
                        flags: SetPathFlags::from_bits_retain(fixed[0]),
                        constants: fixed[1],
                    },
                    &body[2..],
                )
            }
            CODE_DISCONNECT => (RequestKind::Disconnect, body),
            CODE_PUT => (RequestKind::Put, body),
            CODE_PUT_FINAL => (RequestKind::PutFinal, body),
            CODE_GET => (RequestKind::Get, body),
            CODE_GET_FINAL => (RequestKind::GetFinal, body),
            CODE_ABORT => (RequestKind::Abort, body),
            opcode => {
                return Ok(Self {
                    kind: RequestKind::Unknown {
                        opcode,
                        data: body.to_vec(),
                    },
                    headers: Vec::new(),
                })
            }
        };

        Ok(Self {
            kind,
            headers: read_header_list(header_data)?,
        })
    }

    /// Reads one packet from `stream` and decodes it as a request.
    pub fn read_from(stream: &mut dyn ObexStream) -> Result<Self, Error> {
        let (opcode, body) = packet::read(stream)?;
        Self::from_packet(opcode, &body)
    }
}

/// Reads the `N` fixed-field bytes from the start of a packet body.
pub(crate) fn read_fixed<const N: usize>(body: &[u8]) -> Result<[u8; N], Error> {
    match body.get(..N) {
        Some(b) => {
            let mut out = [0; N];
            out.copy_from_slice(b);
            Ok(out)
        }
        None => Err(Error::MalformedPacket {
            length: (packet::PACKET_PREFIX_LEN + body.len()) as u16,
            expected: packet::PACKET_PREFIX_LEN + N,
        }),
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_connect_wire_format() {
        let r = Request::new(RequestKind::Connect {
            version: ObexVersion::new(1, 0),
            flags: 0,
            max_packet_length: 0xffff,
        });

        // Version 1.0, no flags, max packet 0xFFFF: 7 bytes on the wire.
        let raw = r.encode(0xffff).unwrap();
        assert_eq!(raw, hex!("80 0007 10 00 ffff"));

        let parsed = Request::from_packet(raw[0], &raw[3..]).unwrap();
        assert_eq!(parsed, r);
        assert!(parsed.is_final());
    }

    #[test]
    fn test_connect_truncated_fixed_fields() {
        assert_eq!(
            Request::from_packet(CODE_CONNECT, &hex!("10 00")),
            Err(Error::MalformedPacket {
                length: 5,
                expected: 7,
            })
        );
    }

    #[test]
    fn test_set_path_wire_format() {
        let r = Request::new(RequestKind::SetPath {
            flags: SetPathFlags::DONT_CREATE_DIR,
            constants: 0,
        });

        let raw = r.encode(0xffff).unwrap();
        assert_eq!(raw, hex!("85 0005 02 00"));
        assert_eq!(Request::from_packet(raw[0], &raw[3..]).unwrap(), r);
    }

    #[test]
    fn test_set_path_unknown_flag_bits_survive() {
        let r = Request::from_packet(CODE_SET_PATH, &hex!("83 00")).unwrap();

        match r.kind() {
            RequestKind::SetPath { flags, .. } => {
                assert!(flags.contains(SetPathFlags::NAVIGATE_TO_PARENT));
                assert_eq!(flags.bits(), 0x83);
            }
            v => panic!("wrong kind {:?}", v),
        }

        assert_eq!(r.encode(0xffff).unwrap(), hex!("85 0005 83 00"));
    }

    #[test]
    fn test_get_with_headers_round_trip() {
        let mut r = Request::new(RequestKind::GetFinal);
        r.push_header(Header::ConnectionId(0x42));
        r.push_header(Header::Name("foo".to_string()));

        let raw = r.encode(0xffff).unwrap();
        assert_eq!(raw[0], 0x83);

        let parsed = Request::from_packet(raw[0], &raw[3..]).unwrap();
        assert_eq!(parsed.headers(), r.headers());
        assert_eq!(parsed.name(), Some("foo"));
    }

    #[test]
    fn test_final_bit() {
        assert!(!Request::new(RequestKind::Put).is_final());
        assert!(Request::new(RequestKind::PutFinal).is_final());
        assert!(!Request::new(RequestKind::Get).is_final());
        assert!(Request::new(RequestKind::GetFinal).is_final());
        assert!(Request::new(RequestKind::Connect {
            version: ObexVersion::default(),
            flags: 0,
            max_packet_length: 0xffff,
        })
        .is_final());
        assert!(Request::new(RequestKind::Abort).is_final());
    }

    #[test]
    fn test_finalise_promotes_get() {
        let mut r = Request::new(RequestKind::Get);
        r.push_header(Header::Name("bar".to_string()));

        r.finalise();
        assert_eq!(*r.kind(), RequestKind::GetFinal);
        assert_eq!(r.headers().len(), 1);

        // Already-final and fixed-field kinds are unchanged.
        let mut r = Request::new(RequestKind::Abort);
        r.finalise();
        assert_eq!(*r.kind(), RequestKind::Abort);
    }

    #[test]
    fn test_add_header_accounts_for_packet_size() {
        // 3 byte prefix + two 20 byte Target headers leaves no room for a
        // third in a 45 byte packet.
        let mut r = Request::new(RequestKind::Put);
        let h = Header::Target(vec![0; 17]);

        assert!(r.add_header(&h, 45));
        assert!(r.add_header(&h, 45));
        assert_eq!(r.serialised_len(), 43);

        assert!(!r.add_header(&h, 45));
        assert_eq!(r.headers().len(), 2);

        r.reset_headers();
        assert_eq!(r.serialised_len(), 3);
        assert!(r.add_header(&h, 45));
    }

    #[test]
    fn test_unknown_request_round_trip() {
        let raw_body = hex!("aa bb cc dd");
        let r = Request::from_packet(0x04, &raw_body).unwrap();

        assert_eq!(
            *r.kind(),
            RequestKind::Unknown {
                opcode: 0x04,
                data: raw_body.to_vec(),
            }
        );
        assert!(!r.is_final());
        assert_eq!(r.encode(0xffff).unwrap(), hex!("04 0007 aabbccdd"));
    }

    #[test]
    fn test_encode_overflow() {
        let mut r = Request::new(RequestKind::Put);
        r.push_header(Header::Body(vec![0; 100]));

        match r.encode(50) {
            Err(Error::OversizedHeader { id: 0x48, .. }) => {}
            v => panic!("expected oversized header error, got {:?}", v),
        }
    }

    #[test]
    fn test_read_from_stream() {
        use crate::transport::mock::ScriptedStream;

        let mut stream = ScriptedStream::new(hex!("83 0008 cb 00000042").to_vec());
        let r = Request::read_from(&mut stream).unwrap();

        assert_eq!(*r.kind(), RequestKind::GetFinal);
        assert_eq!(r.headers(), [Header::ConnectionId(0x42)]);
    }
}
