//! Whole-frame decoder with a byte-accurate completion estimator.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::WsError;
use crate::frame::{apply_mask, FrameHeader, Opcode};

/// A complete frame with its payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Who must mask: servers require masked client frames, clients reject
/// masked server frames (RFC 6455 section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskPolicy {
    Require,
    Forbid,
}

/// Decodes frames across arbitrary read boundaries. Once the header of the
/// current frame is in, [`required`](Self::required) reports exactly how
/// many more bytes finish the frame, so an I/O loop can reserve precisely
/// enough without over-reading into the next frame.
#[derive(Debug)]
pub struct FrameDecoder {
    header: Option<FrameHeader>,
    policy: MaskPolicy,
    max_payload: u64,
}

/// Generous ceiling; a frame this large is an attack, not a message.
const DEFAULT_MAX_PAYLOAD: u64 = 64 * 1024 * 1024;

impl FrameDecoder {
    /// Decoder for the server side of a connection.
    pub fn server() -> Self {
        Self { header: None, policy: MaskPolicy::Require, max_payload: DEFAULT_MAX_PAYLOAD }
    }

    /// Decoder for the client side of a connection.
    pub fn client() -> Self {
        Self { header: None, policy: MaskPolicy::Forbid, max_payload: DEFAULT_MAX_PAYLOAD }
    }

    pub fn max_payload(mut self, limit: u64) -> Self {
        self.max_payload = limit;
        self
    }

    /// Bytes still needed to complete the current frame given `available`
    /// buffered bytes. Before the header is in this is the minimal header
    /// remainder; after, it is the exact payload deficit.
    pub fn required(&self, available: usize) -> usize {
        match &self.header {
            Some(header) => (header.payload_len as usize).saturating_sub(available),
            None => 2usize.saturating_sub(available),
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.header.is_none() {
            match FrameHeader::decode(src)? {
                None => return Ok(None),
                Some((header, consumed)) => {
                    match self.policy {
                        MaskPolicy::Require if header.mask.is_none() => {
                            return Err(WsError::frame("unmasked frame from client"));
                        }
                        MaskPolicy::Forbid if header.mask.is_some() => {
                            return Err(WsError::frame("masked frame from server"));
                        }
                        _ => {}
                    }
                    if header.payload_len > self.max_payload {
                        return Err(WsError::frame(format!(
                            "payload of {} bytes exceeds the {} byte limit",
                            header.payload_len, self.max_payload
                        )));
                    }
                    src.advance(consumed);
                    self.header = Some(header);
                }
            }
        }

        let header = self.header.as_ref().expect("header parsed above");
        let needed = header.payload_len as usize;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        let mut payload = src.split_to(needed);
        if let Some(key) = header.mask {
            apply_mask(key, &mut payload);
        }
        let frame = Frame { fin: header.fin, opcode: header.opcode, payload: payload.freeze() };
        self.header = None;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, random_mask_key};

    #[test]
    fn masked_round_trip_boundary_sizes() {
        for size in [0usize, 1, 125, 126, 65535, 65536, 70_000] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
            let wire = encode_frame(true, Opcode::Binary, Some(random_mask_key()), &payload);

            let mut decoder = FrameDecoder::server();
            let mut src = BytesMut::from(&wire[..]);
            let frame = decoder.decode(&mut src).unwrap().expect("complete frame");

            assert!(frame.fin);
            assert_eq!(frame.opcode, Opcode::Binary);
            assert_eq!(&frame.payload[..], &payload[..], "size {size}");
            assert!(src.is_empty());
        }
    }

    #[test]
    fn unmasked_round_trip() {
        let wire = encode_frame(true, Opcode::Text, None, b"from server");
        let mut decoder = FrameDecoder::client();
        let mut src = BytesMut::from(&wire[..]);
        let frame = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"from server");
    }

    #[test]
    fn byte_by_byte_feed() {
        let wire = encode_frame(true, Opcode::Text, Some(random_mask_key()), b"drip fed");
        let mut decoder = FrameDecoder::server();
        let mut src = BytesMut::new();

        let mut decoded = None;
        for (i, byte) in wire.iter().enumerate() {
            src.extend_from_slice(&[*byte]);
            if let Some(frame) = decoder.decode(&mut src).unwrap() {
                assert_eq!(i, wire.len() - 1, "completed early");
                decoded = Some(frame);
            }
        }
        assert_eq!(&decoded.unwrap().payload[..], b"drip fed");
    }

    #[test]
    fn required_is_byte_accurate() {
        let payload = vec![7u8; 300];
        let wire = encode_frame(true, Opcode::Binary, Some([9, 9, 9, 9]), &payload);

        let mut decoder = FrameDecoder::server();
        let mut src = BytesMut::new();
        assert_eq!(decoder.required(0), 2);

        // feed the 8-byte header (2 + 2 extended length + 4 mask key)
        src.extend_from_slice(&wire[..8]);
        assert!(decoder.decode(&mut src).unwrap().is_none());
        assert_eq!(decoder.required(src.len()), 300);

        src.extend_from_slice(&wire[8..8 + 100]);
        assert_eq!(decoder.required(src.len()), 200);

        src.extend_from_slice(&wire[108..]);
        let frame = decoder.decode(&mut src).unwrap().expect("complete");
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(decoder.required(0), 2);
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_frame(false, Opcode::Text, Some(random_mask_key()), b"Hel"));
        wire.extend_from_slice(&encode_frame(true, Opcode::Continuation, Some(random_mask_key()), b"lo"));

        let mut decoder = FrameDecoder::server();
        let first = decoder.decode(&mut wire).unwrap().unwrap();
        assert!(!first.fin);
        assert_eq!(&first.payload[..], b"Hel");
        let second = decoder.decode(&mut wire).unwrap().unwrap();
        assert!(second.fin);
        assert_eq!(second.opcode, Opcode::Continuation);
        assert_eq!(&second.payload[..], b"lo");
    }

    #[test]
    fn server_rejects_unmasked_client_frame() {
        let wire = encode_frame(true, Opcode::Text, None, b"nope");
        let mut decoder = FrameDecoder::server();
        let mut src = BytesMut::from(&wire[..]);
        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn client_rejects_masked_server_frame() {
        let wire = encode_frame(true, Opcode::Text, Some(random_mask_key()), b"nope");
        let mut decoder = FrameDecoder::client();
        let mut src = BytesMut::from(&wire[..]);
        assert!(decoder.decode(&mut src).is_err());
    }
}
