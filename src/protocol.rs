//! Wire format
//!
//! Every datagram carries exactly one bit-plane of one chunk:
//!
//! ```text
//!  0                   1                   2                   3
//! +-------------------------------+---------------+---------------+
//! |      Chunk Number (u16)       | Bitplane Idx  | Recv Count(*) |
//! +-------------------------------+---------------+---------------+
//! |            Packed plane, frames_per_chunk / 8 bytes ...       |
//! +---------------------------------------------------------------+
//!
//! (*) present only when both peers run the reporting layout
//! ```
//!
//! All fields are network byte order. Both peers share one configuration, so
//! a datagram is valid only when its length matches the layout exactly.

use bytes::{Buf, BufMut};

use crate::codec::{BitplaneIndex, PlaneLayout};
use crate::error::CodecError;

/// Chunk number + bitplane index
pub const BASE_HEADER_LEN: usize = 3;

/// `received_count` value meaning "no chunk completed yet"
pub const RECEIVED_COUNT_UNKNOWN: u8 = 0xFF;

/// Largest datagram payload over IPv4 UDP
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Chunk numbers wrap at this modulus
pub const CHUNK_NUMBER_MODULUS: usize = 1 << 16;

/// True when `candidate` is ahead of `reference` by less than half the
/// chunk number space.
#[inline]
pub fn chunk_is_newer(candidate: u16, reference: u16) -> bool {
    let distance = candidate.wrapping_sub(reference);
    distance != 0 && distance < 0x8000
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub chunk_number: u16,
    pub bitplane: BitplaneIndex,
    /// Planes the sender observed for its last completed incoming chunk
    pub received_count: Option<u8>,
}

/// Shape of every datagram exchanged by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    plane_bytes: usize,
    max_planes: usize,
    received_count: bool,
}

impl PacketLayout {
    pub fn new(planes: &PlaneLayout, received_count: bool) -> Self {
        Self {
            plane_bytes: planes.plane_bytes(),
            max_planes: planes.max_planes(),
            received_count,
        }
    }

    pub fn has_received_count(&self) -> bool {
        self.received_count
    }

    pub fn header_len(&self) -> usize {
        BASE_HEADER_LEN + usize::from(self.received_count)
    }

    /// Exact datagram size
    pub fn packet_len(&self) -> usize {
        self.header_len() + self.plane_bytes
    }

    /// Append one packet to `buf`.
    ///
    /// `received_count` is written only when the layout carries it.
    pub fn encode(&self, header: &PacketHeader, payload: &[u8], buf: &mut impl BufMut) {
        debug_assert_eq!(payload.len(), self.plane_bytes);
        buf.put_u16(header.chunk_number);
        buf.put_u8(header.bitplane.raw());
        if self.received_count {
            buf.put_u8(header.received_count.unwrap_or(RECEIVED_COUNT_UNKNOWN));
        }
        buf.put_slice(payload);
    }

    /// Split a datagram into header and packed plane.
    pub fn decode<'a>(&self, datagram: &'a [u8]) -> Result<(PacketHeader, &'a [u8]), CodecError> {
        if datagram.len() != self.packet_len() {
            return Err(CodecError::InvalidPacketLength {
                expected: self.packet_len(),
                actual: datagram.len(),
            });
        }

        let mut cursor = datagram;
        let chunk_number = cursor.get_u16();
        let raw_index = cursor.get_u8();
        if raw_index as usize >= self.max_planes {
            return Err(CodecError::BitplaneOutOfRange {
                index: raw_index,
                max: self.max_planes,
            });
        }
        let received_count = if self.received_count {
            Some(cursor.get_u8()).filter(|&c| c != RECEIVED_COUNT_UNKNOWN)
        } else {
            None
        };

        let header = PacketHeader {
            chunk_number,
            bitplane: BitplaneIndex::from_raw(raw_index),
            received_count,
        };
        Ok((header, cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn layout(received_count: bool) -> PacketLayout {
        PacketLayout::new(&PlaneLayout::new(2, 1024).unwrap(), received_count)
    }

    #[test]
    fn test_packet_sizes() {
        assert_eq!(layout(false).packet_len(), 3 + 128);
        assert_eq!(layout(true).packet_len(), 4 + 128);
    }

    #[test]
    fn test_header_is_network_order() {
        let layout = layout(true);
        let header = PacketHeader {
            chunk_number: 0x1234,
            bitplane: BitplaneIndex::from_raw(31),
            received_count: Some(27),
        };
        let payload = [0xAAu8; 128];
        let mut buf = BytesMut::with_capacity(layout.packet_len());
        layout.encode(&header, &payload, &mut buf);

        assert_eq!(&buf[..4], &[0x12, 0x34, 31, 27]);

        let (decoded, plane) = layout.decode(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(plane, &payload[..]);
    }

    #[test]
    fn test_unknown_received_count() {
        let layout = layout(true);
        let header = PacketHeader {
            chunk_number: 9,
            bitplane: BitplaneIndex::from_raw(0),
            received_count: None,
        };
        let mut buf = BytesMut::new();
        layout.encode(&header, &[0u8; 128], &mut buf);
        assert_eq!(buf[3], RECEIVED_COUNT_UNKNOWN);
        assert_eq!(layout.decode(&buf).unwrap().0.received_count, None);
    }

    #[test]
    fn test_rejects_malformed() {
        let layout = layout(false);
        assert_eq!(
            layout.decode(&[0u8; 10]),
            Err(CodecError::InvalidPacketLength { expected: 131, actual: 10 })
        );
        assert!(layout.decode(&[]).is_err());
        assert!(layout.decode(&[0u8; 132]).is_err());

        let mut datagram = vec![0u8; 131];
        datagram[2] = 32;
        assert_eq!(
            layout.decode(&datagram),
            Err(CodecError::BitplaneOutOfRange { index: 32, max: 32 })
        );
    }

    #[test]
    fn test_chunk_is_newer_wraps() {
        assert!(chunk_is_newer(8, 7));
        assert!(!chunk_is_newer(7, 7));
        assert!(!chunk_is_newer(6, 7));
        assert!(chunk_is_newer(0, 65535));
        assert!(!chunk_is_newer(65535, 0));
    }
}
