//! Packet framing: exact-length reads from the transport and the chunked
//! emission used for multi-packet messages.

use byteorder::{BigEndian, WriteBytesExt};

use crate::header::Header;
use crate::response::CODE_CONTINUE;
use crate::transport::ObexStream;
use crate::Error;

/// Bytes occupied by the opcode and 16-bit length field of every packet.
pub(crate) const PACKET_PREFIX_LEN: usize = 3;

/// Reads one complete packet, returning its opcode and the body after the
/// 3 byte prefix.
///
/// The length field covers the whole packet including the prefix, so
/// exactly `length - 3` further bytes are read.
pub(crate) fn read(stream: &mut dyn ObexStream) -> Result<(u8, Vec<u8>), Error> {
    let mut prefix = [0u8; PACKET_PREFIX_LEN];
    stream.recv_exact(&mut prefix)?;

    let length = u16::from_be_bytes([prefix[1], prefix[2]]);
    if (length as usize) < PACKET_PREFIX_LEN {
        return Err(Error::MalformedPacket {
            length,
            expected: PACKET_PREFIX_LEN,
        });
    }

    let mut body = vec![0; length as usize - PACKET_PREFIX_LEN];
    stream.recv_exact(&mut body)?;

    Ok((prefix[0], body))
}

/// Encodes a message as one or more packet buffers, each at most
/// `max_packet` bytes on the wire.
///
/// The fixed fields and headers are packed greedily in order; a header
/// chunk is never split across packets. Every buffer except the last
/// carries the CONTINUE opcode (0x90); the last carries `code`. At least
/// one buffer is always produced, even for an empty message.
///
/// With `multi_part` false the message must fit a single buffer, and
/// [`Error::OversizedMessage`] is returned when it does not. A single
/// header larger than `max_packet - 3` can never be emitted and is
/// [`Error::OversizedHeader`].
pub(crate) fn encode_chunks(
    code: u8,
    fixed: &[u8],
    headers: &[Header],
    max_packet: u16,
    multi_part: bool,
) -> Result<Vec<Vec<u8>>, Error> {
    // Every packet may carry up to `max_packet - 3` bytes of payload.
    let budget = (max_packet as usize)
        .checked_sub(PACKET_PREFIX_LEN)
        .filter(|b| fixed.len() <= *b)
        .ok_or(Error::OversizedMessage {
            len: PACKET_PREFIX_LEN + fixed.len(),
            max: max_packet,
        })?;

    // Serialise each header up front; pieces move whole into packets.
    let mut pieces = Vec::with_capacity(headers.len());
    for h in headers {
        let len = h.serialised_len();
        if len > budget {
            return Err(Error::OversizedHeader {
                id: h.id(),
                len,
                max: max_packet,
            });
        }

        let mut piece = Vec::with_capacity(len);
        h.serialise_into(&mut piece)?;
        pieces.push(piece);
    }

    // Greedy packing: fill each packet until the next piece no longer fits.
    // The fixed fields ride in the first packet only.
    let mut payloads = Vec::new();
    let mut current = Vec::from(fixed);
    for piece in pieces {
        if current.len() + piece.len() <= budget {
            current.extend_from_slice(&piece);
        } else {
            payloads.push(std::mem::replace(&mut current, piece));
        }
    }
    payloads.push(current);

    if !multi_part && payloads.len() > 1 {
        let len = PACKET_PREFIX_LEN * payloads.len()
            + payloads.iter().map(Vec::len).sum::<usize>();
        return Err(Error::OversizedMessage {
            len,
            max: max_packet,
        });
    }

    let last = payloads.len() - 1;
    let mut chunks = Vec::with_capacity(payloads.len());
    for (i, payload) in payloads.into_iter().enumerate() {
        let mut chunk = Vec::with_capacity(PACKET_PREFIX_LEN + payload.len());
        chunk.write_u8(if i == last { code } else { CODE_CONTINUE })?;
        chunk.write_u16::<BigEndian>((PACKET_PREFIX_LEN + payload.len()) as u16)?;
        chunk.extend_from_slice(&payload);
        chunks.push(chunk);
    }

    Ok(chunks)
}
