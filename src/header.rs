//! Typed OBEX header chunks and their wire codec.

use std::io::{Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::Error;

/// Bytes occupied by a header ID and 16-bit length field.
pub(crate) const HEADER_PREFIX_LEN: usize = 3;

// The top two bits of a header identifier select its wire encoding.
const ENCODING_MASK: u8 = 0xc0;
const ENCODING_TEXT: u8 = 0x00;
const ENCODING_BYTES: u8 = 0x40;
const ENCODING_BYTE: u8 = 0x80;
const ENCODING_FOUR_BYTE: u8 = 0xc0;

const ID_NAME: u8 = 0x01;
const ID_DESCRIPTION: u8 = 0x05;
const ID_TYPE: u8 = 0x42;
const ID_TIME: u8 = 0x44;
const ID_TARGET: u8 = 0x46;
const ID_HTTP: u8 = 0x47;
const ID_BODY: u8 = 0x48;
const ID_END_OF_BODY: u8 = 0x49;
const ID_WHO: u8 = 0x4a;
const ID_APP_PARAMETERS: u8 = 0x4c;
const ID_AUTH_CHALLENGE: u8 = 0x4d;
const ID_AUTH_RESPONSE: u8 = 0x4e;
const ID_OBJECT_CLASS: u8 = 0x51;
const ID_COUNT: u8 = 0xc0;
const ID_LENGTH: u8 = 0xc3;
const ID_CONNECTION_ID: u8 = 0xcb;

/// A typed OBEX header chunk.
///
/// Text headers (`Name`, `Description`) are UTF-16BE on the wire and always
/// NUL-terminated with a two byte `00 00` pair included in the chunk length.
/// Byte-string headers carry opaque payloads; `Type` additionally gains a
/// single trailing `0x00` on encode if the value lacks one. `Count`,
/// `Length` and `Connection-ID` are 4-byte big-endian integers.
///
/// Identifiers outside the known set are preserved in [`Header::Unknown`]
/// with their raw payload, so re-encoding a decoded header is always
/// byte-exact. The identifier's top two bits recover the wire encoding.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// `Name` (0x01): the name of the object, UTF-16BE text.
    Name(String),

    /// `Description` (0x05): a text description of the object.
    Description(String),

    /// `Type` (0x42): the object MIME type, NUL-terminated on the wire.
    Type(Vec<u8>),

    /// `Time` (0x44): an ISO 8601 timestamp as bytes.
    Time(Vec<u8>),

    /// `Target` (0x46): the service UUID the connection is addressed to.
    Target(Vec<u8>),

    /// `HTTP` (0x47): an HTTP 1.x header line.
    Http(Vec<u8>),

    /// `Body` (0x48): one chunk of the object body.
    Body(Vec<u8>),

    /// `End-Of-Body` (0x49): the final chunk of the object body.
    EndOfBody(Vec<u8>),

    /// `Who` (0x4A): the peer service identity answering a `Target`.
    Who(Vec<u8>),

    /// `App-Parameters` (0x4C): profile-defined tag/length/value pairs.
    AppParameters(Vec<u8>),

    /// `Auth-Challenge` (0x4D): opaque authentication challenge.
    AuthChallenge(Vec<u8>),

    /// `Auth-Response` (0x4E): opaque authentication response.
    AuthResponse(Vec<u8>),

    /// `Object-Class` (0x51): the OBEX object class of the object.
    ObjectClass(Vec<u8>),

    /// `Count` (0xC0): the number of objects in the operation.
    Count(u32),

    /// `Length` (0xC3): the object length in bytes.
    Length(u32),

    /// `Connection-ID` (0xCB): the token issued at CONNECT time that binds
    /// subsequent requests to the connection.
    ConnectionId(u32),

    /// A header unknown to this library, kept for exact round-tripping.
    Unknown {
        /// The identifier byte, encoding class included.
        id: u8,

        /// The raw payload exactly as received (1 byte for `10`-class
        /// identifiers, 4 bytes for `11`-class, arbitrary otherwise).
        data: Vec<u8>,
    },
}

impl Header {
    /// Returns the identifier byte used for this header on the wire.
    pub fn id(&self) -> u8 {
        match self {
            Self::Name(_) => ID_NAME,
            Self::Description(_) => ID_DESCRIPTION,
            Self::Type(_) => ID_TYPE,
            Self::Time(_) => ID_TIME,
            Self::Target(_) => ID_TARGET,
            Self::Http(_) => ID_HTTP,
            Self::Body(_) => ID_BODY,
            Self::EndOfBody(_) => ID_END_OF_BODY,
            Self::Who(_) => ID_WHO,
            Self::AppParameters(_) => ID_APP_PARAMETERS,
            Self::AuthChallenge(_) => ID_AUTH_CHALLENGE,
            Self::AuthResponse(_) => ID_AUTH_RESPONSE,
            Self::ObjectClass(_) => ID_OBJECT_CLASS,
            Self::Count(_) => ID_COUNT,
            Self::Length(_) => ID_LENGTH,
            Self::ConnectionId(_) => ID_CONNECTION_ID,
            Self::Unknown { id, .. } => *id,
        }
    }

    /// Returns true for `Body` and `End-Of-Body` headers.
    pub fn is_body(&self) -> bool {
        matches!(self, Self::Body(_) | Self::EndOfBody(_))
    }

    /// Returns the on-wire length of this header chunk once serialised.
    pub fn serialised_len(&self) -> usize {
        match self {
            Self::Name(s) | Self::Description(s) => {
                // ID + length field + UTF-16BE payload + two byte NUL.
                HEADER_PREFIX_LEN + s.encode_utf16().count() * 2 + 2
            }
            Self::Type(d) => {
                let nul = usize::from(d.last() != Some(&0));
                HEADER_PREFIX_LEN + d.len() + nul
            }
            Self::Time(d)
            | Self::Target(d)
            | Self::Http(d)
            | Self::Body(d)
            | Self::EndOfBody(d)
            | Self::Who(d)
            | Self::AppParameters(d)
            | Self::AuthChallenge(d)
            | Self::AuthResponse(d)
            | Self::ObjectClass(d) => HEADER_PREFIX_LEN + d.len(),
            Self::Count(_) | Self::Length(_) | Self::ConnectionId(_) => 5,
            Self::Unknown { id, data } => match id & ENCODING_MASK {
                ENCODING_BYTE => 2,
                ENCODING_FOUR_BYTE => 5,
                _ => HEADER_PREFIX_LEN + data.len(),
            },
        }
    }

    /// Serialises this header into `buf`, advancing it by
    /// [`Header::serialised_len()`] bytes.
    pub fn serialise_into<W: Write>(&self, mut buf: W) -> Result<(), std::io::Error> {
        buf.write_u8(self.id())?;

        match self {
            Self::Name(s) | Self::Description(s) => {
                buf.write_u16::<BigEndian>(self.serialised_len() as u16)?;
                for unit in s.encode_utf16() {
                    buf.write_u16::<BigEndian>(unit)?;
                }
                buf.write_all(&[0, 0])
            }
            Self::Type(d) => {
                buf.write_u16::<BigEndian>(self.serialised_len() as u16)?;
                buf.write_all(d)?;
                if d.last() != Some(&0) {
                    buf.write_u8(0)?;
                }
                Ok(())
            }
            Self::Time(d)
            | Self::Target(d)
            | Self::Http(d)
            | Self::Body(d)
            | Self::EndOfBody(d)
            | Self::Who(d)
            | Self::AppParameters(d)
            | Self::AuthChallenge(d)
            | Self::AuthResponse(d)
            | Self::ObjectClass(d) => {
                buf.write_u16::<BigEndian>(self.serialised_len() as u16)?;
                buf.write_all(d)
            }
            Self::Count(v) | Self::Length(v) | Self::ConnectionId(v) => {
                buf.write_u32::<BigEndian>(*v)
            }
            Self::Unknown { id, data } => {
                if id & ENCODING_MASK == ENCODING_TEXT || id & ENCODING_MASK == ENCODING_BYTES {
                    buf.write_u16::<BigEndian>(self.serialised_len() as u16)?;
                }
                buf.write_all(data)
            }
        }
    }

    /// Constructs a `Header` by parsing the wire format read from `r`,
    /// advancing the position to the end of the chunk.
    pub(crate) fn from_cursor(r: &mut Cursor<&'_ [u8]>) -> Result<Self, Error> {
        let id = r.read_u8().map_err(|_| Error::MalformedHeader { id: 0 })?;

        match id & ENCODING_MASK {
            ENCODING_TEXT | ENCODING_BYTES => {
                let length = r
                    .read_u16::<BigEndian>()
                    .map_err(|_| Error::MalformedHeader { id })?;
                if (length as usize) < HEADER_PREFIX_LEN {
                    return Err(Error::MalformedHeader { id });
                }
                let payload = read_slice_bytes(r, length as usize - HEADER_PREFIX_LEN, id)?;
                Self::from_parts(id, payload)
            }
            ENCODING_BYTE => {
                let v = r.read_u8().map_err(|_| Error::MalformedHeader { id })?;
                // No 1-byte identifiers are defined by the known set.
                Ok(Self::Unknown { id, data: vec![v] })
            }
            _ => {
                let v = r
                    .read_u32::<BigEndian>()
                    .map_err(|_| Error::MalformedHeader { id })?;
                Ok(match id {
                    ID_COUNT => Self::Count(v),
                    ID_LENGTH => Self::Length(v),
                    ID_CONNECTION_ID => Self::ConnectionId(v),
                    _ => Self::Unknown {
                        id,
                        data: v.to_be_bytes().to_vec(),
                    },
                })
            }
        }
    }

    /// Builds the typed variant for a variable-length header payload.
    fn from_parts(id: u8, payload: &[u8]) -> Result<Self, Error> {
        Ok(match id {
            ID_NAME => Self::Name(decode_text(id, payload)?),
            ID_DESCRIPTION => Self::Description(decode_text(id, payload)?),
            ID_TYPE => Self::Type(payload.to_vec()),
            ID_TIME => Self::Time(payload.to_vec()),
            ID_TARGET => Self::Target(payload.to_vec()),
            ID_HTTP => Self::Http(payload.to_vec()),
            ID_BODY => Self::Body(payload.to_vec()),
            ID_END_OF_BODY => Self::EndOfBody(payload.to_vec()),
            ID_WHO => Self::Who(payload.to_vec()),
            ID_APP_PARAMETERS => Self::AppParameters(payload.to_vec()),
            ID_AUTH_CHALLENGE => Self::AuthChallenge(payload.to_vec()),
            ID_AUTH_RESPONSE => Self::AuthResponse(payload.to_vec()),
            ID_OBJECT_CLASS => Self::ObjectClass(payload.to_vec()),
            _ => Self::Unknown {
                id,
                data: payload.to_vec(),
            },
        })
    }
}

/// Decodes a NUL-terminated UTF-16BE text payload.
///
/// A missing terminator is tolerated on ingress; encode always re-appends
/// it.
fn decode_text(id: u8, payload: &[u8]) -> Result<String, Error> {
    if payload.len() % 2 != 0 {
        return Err(Error::MalformedHeader { id });
    }

    let payload = match payload {
        [head @ .., 0, 0] => head,
        other => other,
    };

    let units = payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| Error::MalformedHeader { id })
}

/// Parses a packet's header section to its end.
pub(crate) fn read_header_list(data: &[u8]) -> Result<Vec<Header>, Error> {
    let mut r = Cursor::new(data);
    let mut headers = Vec::new();

    while (r.position() as usize) < data.len() {
        headers.push(Header::from_cursor(&mut r)?);
    }

    Ok(headers)
}

/// Returns a subslice of len bytes from c without copying if it is safe to
/// do so.
fn read_slice_bytes<'a>(c: &mut Cursor<&'a [u8]>, len: usize, id: u8) -> Result<&'a [u8], Error> {
    let data = *c.get_ref();
    let start = c.position() as usize;
    let end = start + len;

    // Validate the subslice is within the data buffer
    if end > data.len() {
        return Err(Error::MalformedHeader { id });
    }

    c.set_position(end as u64);
    Ok(&data[start..end])
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    #[track_caller]
    fn encode(h: &Header) -> Vec<u8> {
        let mut buf = Vec::new();
        h.serialise_into(&mut buf).expect("serialise failed");
        assert_eq!(buf.len(), h.serialised_len());
        buf
    }

    #[track_caller]
    fn decode_one(buf: &[u8]) -> Header {
        let mut c = Cursor::new(buf);
        let h = Header::from_cursor(&mut c).expect("decode failed");
        assert_eq!(c.position() as usize, buf.len());
        h
    }

    #[test]
    fn test_name_wire_format() {
        let h = Header::Name("foo".to_string());
        let raw = encode(&h);

        // ID, length 11, UTF-16BE "foo", NUL pair.
        assert_eq!(raw, hex!("01 000b 0066 006f 006f 0000"));
        assert_eq!(decode_one(&raw), h);
    }

    #[test]
    fn test_empty_name() {
        let h = Header::Name(String::new());
        let raw = encode(&h);

        assert_eq!(raw, hex!("01 0005 0000"));
        assert_eq!(decode_one(&raw), h);
    }

    #[test]
    fn test_name_without_terminator_tolerated() {
        // Ingress without the trailing NUL pair still decodes.
        let raw = hex!("01 0009 0062 0061 0072");
        assert_eq!(decode_one(&raw), Header::Name("bar".to_string()));
    }

    #[test]
    fn test_name_odd_payload() {
        let raw = hex!("01 0006 00 66 00");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(
            Header::from_cursor(&mut c),
            Err(Error::MalformedHeader { id: 0x01 })
        );
    }

    #[test]
    fn test_name_lone_surrogate() {
        let raw = hex!("01 0007 d800 0000");
        let mut c = Cursor::new(raw.as_slice());
        assert_eq!(
            Header::from_cursor(&mut c),
            Err(Error::MalformedHeader { id: 0x01 })
        );
    }

    #[test]
    fn test_type_gains_terminator() {
        let h = Header::Type(b"x-obex/folder-listing".to_vec());
        let raw = encode(&h);

        assert_eq!(raw[0], 0x42);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]), 25);
        assert_eq!(raw.last(), Some(&0));

        // The decoded value keeps the received bytes untouched.
        assert_eq!(
            decode_one(&raw),
            Header::Type(b"x-obex/folder-listing\0".to_vec())
        );
    }

    #[test]
    fn test_type_already_terminated() {
        let h = Header::Type(b"text/x-vcard\0".to_vec());
        let raw = encode(&h);

        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]), 16);
        assert_eq!(decode_one(&raw), h);
    }

    #[test]
    fn test_connection_id_wire_format() {
        let h = Header::ConnectionId(1);
        let raw = encode(&h);

        assert_eq!(raw, hex!("cb 00000001"));
        assert_eq!(decode_one(&raw), h);
    }

    #[test]
    fn test_four_byte_headers() {
        for (h, id) in [
            (Header::Count(7), 0xc0),
            (Header::Length(0x12345678), 0xc3),
            (Header::ConnectionId(0xdeadbeef), 0xcb),
        ] {
            let raw = encode(&h);
            assert_eq!(raw.len(), 5);
            assert_eq!(raw[0], id);
            assert_eq!(decode_one(&raw), h);
        }
    }

    #[test]
    fn test_body_round_trip() {
        let h = Header::Body(vec![1, 2, 3, 4, 5]);
        let raw = encode(&h);

        assert_eq!(raw, hex!("48 0008 0102030405"));
        assert_eq!(decode_one(&raw), h);
    }

    #[test]
    fn test_length_field_below_minimum() {
        // Scenario: ID 0x42 advertising a 2 byte chunk.
        let raw = hex!("42 0002 00");
        let mut c = Cursor::new(raw.as_slice());

        assert_eq!(
            Header::from_cursor(&mut c),
            Err(Error::MalformedHeader { id: 0x42 })
        );
    }

    #[test]
    fn test_payload_past_end_of_buffer() {
        let raw = hex!("48 00ff 0102");
        let mut c = Cursor::new(raw.as_slice());

        assert_eq!(
            Header::from_cursor(&mut c),
            Err(Error::MalformedHeader { id: 0x48 })
        );
    }

    #[test]
    fn test_truncated_four_byte_value() {
        let raw = hex!("cb 0000");
        let mut c = Cursor::new(raw.as_slice());

        assert_eq!(
            Header::from_cursor(&mut c),
            Err(Error::MalformedHeader { id: 0xcb })
        );
    }

    #[test]
    fn test_unknown_byte_string_header() {
        // User-defined byte-string ID.
        let raw = hex!("70 0006 aabbcc");
        let h = decode_one(&raw);

        assert_eq!(
            h,
            Header::Unknown {
                id: 0x70,
                data: vec![0xaa, 0xbb, 0xcc],
            }
        );
        assert_eq!(encode(&h), raw);
    }

    #[test]
    fn test_unknown_one_byte_header() {
        let raw = hex!("97 2a");
        let h = decode_one(&raw);

        assert_eq!(
            h,
            Header::Unknown {
                id: 0x97,
                data: vec![0x2a],
            }
        );
        assert_eq!(encode(&h), raw);
    }

    #[test]
    fn test_unknown_four_byte_header() {
        let raw = hex!("cf 01020304");
        let h = decode_one(&raw);

        assert_eq!(
            h,
            Header::Unknown {
                id: 0xcf,
                data: vec![1, 2, 3, 4],
            }
        );
        assert_eq!(encode(&h), raw);
    }

    #[test]
    fn test_read_header_list() {
        let mut raw = Vec::new();
        let want = vec![
            Header::ConnectionId(0x42),
            Header::Name("a".to_string()),
            Header::Body(vec![9, 9]),
        ];
        for h in &want {
            h.serialise_into(&mut raw).unwrap();
        }

        assert_eq!(read_header_list(&raw).unwrap(), want);
    }

    #[test]
    fn test_read_header_list_trailing_garbage() {
        let mut raw = Vec::new();
        Header::Count(1).serialise_into(&mut raw).unwrap();
        raw.extend_from_slice(&hex!("48 00ff"));

        assert_eq!(
            read_header_list(&raw),
            Err(Error::MalformedHeader { id: 0x48 })
        );
    }

    proptest! {
        #[test]
        fn prop_byte_string_round_trip(
            data in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            for h in [
                Header::Target(data.clone()),
                Header::Body(data.clone()),
                Header::AppParameters(data.clone()),
            ] {
                let raw = encode(&h);
                prop_assert_eq!(decode_one(&raw), h);
            }
        }

        #[test]
        fn prop_text_round_trip(s in ".*") {
            let h = Header::Name(s);
            let raw = encode(&h);
            prop_assert_eq!(decode_one(&raw), h);
        }

        #[test]
        fn prop_four_byte_round_trip(v in any::<u32>()) {
            for h in [Header::Count(v), Header::Length(v), Header::ConnectionId(v)] {
                let raw = encode(&h);
                prop_assert_eq!(decode_one(&raw), h);
            }
        }

        #[test]
        fn prop_unknown_round_trip(
            id in any::<u8>(),
            data in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            const KNOWN: [u8; 16] = [
                ID_NAME, ID_DESCRIPTION, ID_TYPE, ID_TIME, ID_TARGET, ID_HTTP,
                ID_BODY, ID_END_OF_BODY, ID_WHO, ID_APP_PARAMETERS,
                ID_AUTH_CHALLENGE, ID_AUTH_RESPONSE, ID_OBJECT_CLASS,
                ID_COUNT, ID_LENGTH, ID_CONNECTION_ID,
            ];
            prop_assume!(!KNOWN.contains(&id));

            // Size the payload to what the encoding class dictates.
            let mut data = data;
            match id & ENCODING_MASK {
                ENCODING_BYTE => data.resize(1, 0),
                ENCODING_FOUR_BYTE => data.resize(4, 0),
                _ => {}
            }

            let h = Header::Unknown { id, data };
            let raw = encode(&h);
            prop_assert_eq!(decode_one(&raw), h);
        }
    }
}
