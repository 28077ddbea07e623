//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//! Each frame is an atomic unit of transmission carrying a payload plus protocol metadata.
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! The length indicator holds the payload length directly when it is at most 125.
//! The value 126 announces a 16-bit big-endian length and 127 a 64-bit big-endian
//! length in the following bytes.
//!
//! Frames come in two categories:
//!
//! - **Data Frames**: `Text`, `Binary`, and `Continuation` (the tail of a fragmented message).
//! - **Control Frames**: `Close`, `Ping`, and `Pong`. They carry at most 125 bytes and are
//!   never fragmented, but may be interleaved between the fragments of a data message.
//!
//! Every frame a client sends is masked with a fresh random key. Masking is applied while
//! serializing, so a [`Frame`] payload always holds the plain application bytes.
//!
//! ```rust
//! use rawws::frame::{self, OpCode};
//!
//! let wire = frame::encode(b"hello", OpCode::Text, true, false);
//! assert_eq!(&wire[..], b"\x81\x05hello");
//! ```
use bytes::{BufMut, Bytes, BytesMut};

use crate::{close::CloseCode, mask, WebSocketError};

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// The numeric values for each OpCode are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved and rejected when decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Largest possible header: 2 base bytes, 8 extended length bytes and a 4 byte mask key.
pub const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Represents a WebSocket frame.
///
/// - `fin`: Final fragment flag. When `true`, indicates this frame completes a message.
/// - `opcode`: Defines the frame type and interpretation.
/// - `mask`: Masking key applied when the frame is serialized. Decoded frames are
///   already unmasked and carry `None`.
/// - `payload`: The plain application bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    mask: Option<[u8; 4]>,
    /// The payload of the frame.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new WebSocket `Frame`.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    /// Creates a final text frame.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    /// Creates a final binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    /// Creates a final continuation frame.
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// Creates a ping frame.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    /// Creates a pong frame, usually echoing the payload of a ping.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// Creates a close frame whose payload is the big-endian `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(u16::from(code));
        payload.extend_from_slice(reason);

        Self::new(true, OpCode::Close, None, payload.freeze())
    }

    /// Creates a close frame with a raw payload.
    ///
    /// This method does not validate if `payload` is a valid close frame payload.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    /// Sets the FIN flag.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the masking key used when the frame is serialized.
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Returns the masking key, if any.
    #[inline(always)]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Extracts the close code from a Close frame's payload.
    ///
    /// Returns `None` if the payload is shorter than two bytes.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = self.payload.get(0..2)?;
        Some(CloseCode::from(u16::from_be_bytes([code[0], code[1]])))
    }

    /// Returns the close reason: the payload bytes following the two byte status code.
    pub fn close_reason(&self) -> Bytes {
        if self.payload.len() > 2 {
            self.payload.slice(2..)
        } else {
            Bytes::new()
        }
    }

    /// Formats the frame header into `head` and returns its size.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub fn fmt_head(&self, head: &mut [u8]) -> usize {
        fmt_head(head, self.fin, self.opcode, self.payload.len(), self.mask)
    }

    /// Serializes the frame into `dst`, masking the payload into `dst` when a key is set.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let mut head = [0; MAX_HEAD_SIZE];
        let size = self.fmt_head(&mut head);

        dst.reserve(size + self.payload.len());
        dst.extend_from_slice(&head[..size]);
        match self.mask {
            Some(key) => mask::mask_into(dst, &self.payload, key),
            None => dst.extend_from_slice(&self.payload),
        }
    }
}

fn fmt_head(
    head: &mut [u8],
    fin: bool,
    opcode: OpCode,
    len: usize,
    mask: Option<[u8; 4]>,
) -> usize {
    head[0] = (fin as u8) << 7 | u8::from(opcode);

    let size = if len <= 125 {
        head[1] = len as u8;
        2
    } else if len <= u16::MAX as usize {
        head[1] = 126;
        head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        4
    } else {
        head[1] = 127;
        head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        10
    };

    if let Some(mask) = mask {
        head[1] |= 0x80;
        head[size..size + 4].copy_from_slice(&mask);
        size + 4
    } else {
        size
    }
}

/// Encodes `payload` into a complete wire frame.
///
/// When `masked` is set a fresh random key is drawn and the masked payload is
/// written into the returned buffer; `payload` itself is never modified.
pub fn encode(payload: &[u8], opcode: OpCode, fin: bool, masked: bool) -> BytesMut {
    let mask = masked.then(mask::random_key);

    let mut head = [0; MAX_HEAD_SIZE];
    let size = fmt_head(&mut head, fin, opcode, payload.len(), mask);

    let mut dst = BytesMut::with_capacity(size + payload.len());
    dst.extend_from_slice(&head[..size]);
    match mask {
        Some(key) => mask::mask_into(&mut dst, payload, key),
        None => dst.extend_from_slice(payload),
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    mod opcode_tests {
        use super::*;

        #[test]
        fn test_is_control() {
            assert!(OpCode::Close.is_control());
            assert!(OpCode::Ping.is_control());
            assert!(OpCode::Pong.is_control());

            assert!(!OpCode::Continuation.is_control());
            assert!(!OpCode::Text.is_control());
            assert!(!OpCode::Binary.is_control());
        }

        #[test]
        fn test_try_from_u8_valid() {
            assert_eq!(OpCode::try_from(0x0).unwrap(), OpCode::Continuation);
            assert_eq!(OpCode::try_from(0x1).unwrap(), OpCode::Text);
            assert_eq!(OpCode::try_from(0x2).unwrap(), OpCode::Binary);
            assert_eq!(OpCode::try_from(0x8).unwrap(), OpCode::Close);
            assert_eq!(OpCode::try_from(0x9).unwrap(), OpCode::Ping);
            assert_eq!(OpCode::try_from(0xA).unwrap(), OpCode::Pong);
        }

        #[test]
        fn test_try_from_u8_reserved() {
            for code in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
                assert!(matches!(
                    OpCode::try_from(code),
                    Err(WebSocketError::InvalidOpCode(c)) if c == code
                ));
            }
        }
    }

    mod encode_tests {
        use super::*;

        #[test]
        fn test_length_indicator_boundaries() {
            let cases = [
                (0usize, 0u8, 2usize),
                (1, 1, 2),
                (125, 125, 2),
                (126, 126, 4),
                (65535, 126, 4),
                (65536, 127, 10),
            ];

            for (len, indicator, head_size) in cases {
                let payload = vec![0x5A; len];
                let wire = encode(&payload, OpCode::Binary, true, false);

                assert_eq!(wire[0], 0x82, "len {len}");
                assert_eq!(wire[1], indicator, "len {len}");
                assert_eq!(wire.len(), head_size + len, "len {len}");
                assert_eq!(&wire[head_size..], &payload[..], "len {len}");
            }
        }

        #[test]
        fn test_extended_lengths_are_big_endian() {
            let wire = encode(&[0; 300], OpCode::Text, true, false);
            assert_eq!(&wire[2..4], &[0x01, 0x2C]);

            let wire = encode(&vec![0; 70_000], OpCode::Text, true, false);
            assert_eq!(&wire[2..10], &[0, 0, 0, 0, 0, 0x01, 0x11, 0x70]);
        }

        #[test]
        fn test_masked_encoding_does_not_touch_input() {
            let payload = b"do not mutate me".to_vec();
            let wire = encode(&payload, OpCode::Text, false, true);

            assert_eq!(payload, b"do not mutate me".to_vec());
            assert_eq!(wire[0], 0x01);
            assert_eq!(wire[1], 0x80 | payload.len() as u8);

            let key = [wire[2], wire[3], wire[4], wire[5]];
            let mut body = wire[6..].to_vec();
            mask::apply_mask(&mut body, key);
            assert_eq!(body, payload);
        }

        #[test]
        fn test_frame_encode_into_matches_encode() {
            let key = [0xAA, 0xBB, 0xCC, 0xDD];
            let frame = Frame::text("Header test").with_mask(key);

            let mut dst = BytesMut::new();
            frame.encode_into(&mut dst);

            assert_eq!(dst[0], 0x81);
            assert_eq!(dst[1], 0x80 | 11);
            assert_eq!(&dst[2..6], &key);
            assert_eq!(frame.payload, Bytes::from("Header test"));
        }
    }

    mod frame_tests {
        use super::*;

        #[test]
        fn test_close_payload_layout() {
            let frame = Frame::close(CloseCode::Normal, "bye");

            assert_eq!(frame.opcode, OpCode::Close);
            assert_eq!(&frame.payload[..], b"\x03\xE8bye");
            assert_eq!(frame.close_code(), Some(CloseCode::Normal));
            assert_eq!(frame.close_reason(), Bytes::from("bye"));
        }

        #[test]
        fn test_close_reason_excludes_status_bytes() {
            let frame = Frame::close_raw(&b"\x03\xE8"[..]);
            assert_eq!(frame.close_code(), Some(CloseCode::Normal));
            assert!(frame.close_reason().is_empty());

            let empty = Frame::close_raw(Bytes::new());
            assert_eq!(empty.close_code(), None);
            assert!(empty.close_reason().is_empty());
        }

        #[test]
        fn test_with_fin() {
            let frame = Frame::binary("ab").with_fin(false);
            assert!(!frame.fin);
            assert_eq!(frame.opcode, OpCode::Binary);
            assert_eq!(frame.mask(), None);
        }
    }
}
