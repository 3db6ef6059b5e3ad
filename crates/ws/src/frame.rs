//! WebSocket frame header codec and payload masking.
//!
//! [RFC 6455 section 5](https://datatracker.ietf.org/doc/html/rfc6455#section-5)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WsError;

pub const FIN_BIT: u8 = 0x80;
pub const MASK_BIT: u8 = 0x80;
const RESERVED_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const LENGTH_BITS: u8 = 0x7F;

/// Largest control-frame payload (RFC 6455 section 5.5).
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        self.bits() & 0x8 != 0
    }

    pub fn is_data(self) -> bool {
        !self.is_control()
    }
}

/// Decoded first bytes of a frame; the payload follows on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Wire length of the header itself.
    pub fn encoded_len(&self) -> usize {
        let length_ext = match self.payload_len {
            0..=125 => 0,
            126..=65535 => 2,
            _ => 8,
        };
        let mask = if self.mask.is_some() { 4 } else { 0 };
        2 + length_ext + mask
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());

        let first = if self.fin { FIN_BIT } else { 0 } | self.opcode.bits();
        let mask_flag = if self.mask.is_some() { MASK_BIT } else { 0 };
        dst.put_u8(first);

        match self.payload_len {
            0..=125 => dst.put_u8(mask_flag | self.payload_len as u8),
            126..=65535 => {
                dst.put_u8(mask_flag | 126);
                dst.put_u16(self.payload_len as u16);
            }
            _ => {
                dst.put_u8(mask_flag | 127);
                dst.put_u64(self.payload_len);
            }
        }

        if let Some(key) = self.mask {
            dst.put_slice(&key);
        }
    }

    /// Parses a header from the front of `src`. Returns the header and the
    /// number of consumed bytes, or `None` when more bytes are needed.
    pub fn decode(src: &[u8]) -> Result<Option<(FrameHeader, usize)>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[0];
        let second = src[1];

        if first & RESERVED_BITS != 0 {
            return Err(WsError::frame("reserved bits set"));
        }
        let opcode = Opcode::from_bits(first & OPCODE_BITS)
            .ok_or_else(|| WsError::frame(format!("unknown opcode {:#x}", first & OPCODE_BITS)))?;
        let fin = first & FIN_BIT != 0;
        let masked = second & MASK_BIT != 0;

        let mut consumed = 2usize;
        let payload_len = match second & LENGTH_BITS {
            126 => {
                if src.len() < consumed + 2 {
                    return Ok(None);
                }
                let length = u16::from_be_bytes([src[2], src[3]]) as u64;
                consumed += 2;
                length
            }
            127 => {
                if src.len() < consumed + 8 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&src[2..10]);
                consumed += 8;
                u64::from_be_bytes(bytes)
            }
            length => length as u64,
        };

        if opcode.is_control() {
            if !fin {
                return Err(WsError::frame("fragmented control frame"));
            }
            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(WsError::frame(format!("control payload of {payload_len} bytes")));
            }
        }

        let mask = if masked {
            if src.len() < consumed + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&src[consumed..consumed + 4]);
            consumed += 4;
            Some(key)
        } else {
            None
        };

        Ok(Some((FrameHeader { fin, opcode, mask, payload_len }, consumed)))
    }
}

/// Fresh 4-byte mask key; clients derive one per frame.
pub fn random_mask_key() -> [u8; 4] {
    rand::random()
}

/// XOR-masks the buffer in place; applying twice restores it.
pub fn apply_mask(key: [u8; 4], payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 0x3];
    }
}

/// Builds one complete frame, masking the payload when a key is given.
pub fn encode_frame(fin: bool, opcode: Opcode, mask: Option<[u8; 4]>, payload: &[u8]) -> Bytes {
    let header = FrameHeader { fin, opcode, mask, payload_len: payload.len() as u64 };
    let mut frame = BytesMut::with_capacity(header.encoded_len() + payload.len());
    header.encode(&mut frame);
    match mask {
        Some(key) => {
            let start = frame.len();
            frame.put_slice(payload);
            apply_mask(key, &mut frame[start..]);
        }
        None => frame.put_slice(payload),
    }
    frame.freeze()
}
