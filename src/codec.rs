//! Incremental frame decoding over a [`ChunkQueue`] and frame encoding for the write path.
//!
//! The [`Decoder`] is a small state machine. Each call to [`Decoder::decode`] advances as
//! far as the buffered bytes allow and returns `Ok(None)` when it needs more input, keeping
//! whatever it already parsed. A header split across any number of reads is therefore parsed
//! exactly once, and a pending payload is re-checked without re-parsing its header.
use bytes::BytesMut;
use tokio_util::codec;

use crate::{
    buffer::ChunkQueue,
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD},
    mask, WebSocketError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The two base bytes are parsed; waiting for the extended length and mask key.
    Header(Header),
    /// The full header is parsed; waiting for the payload.
    Payload(HeaderAndMask),
}

/// Represents the initial header fields of a WebSocket frame.
struct Header {
    fin: bool,
    masked: bool,
    opcode: OpCode,
    /// Number of extended length bytes: 0, 2 or 8.
    extra: usize,
    /// The 7-bit length indicator.
    length_code: u8,
    /// Bytes still needed to complete the header: `extra` plus 4 if masked.
    header_size: usize,
}

/// Contains header and mask data after decoding the bytes before the payload.
struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// A decoder for WebSocket frames, handling state transitions.
pub struct Decoder {
    state: Option<ReadState>,
    /// Maximum allowed size for a single frame payload.
    max_payload_size: usize,
    /// Whether masked frames are accepted and unmasked, or rejected.
    accept_masked: bool,
}

impl Decoder {
    /// Creates a decoder limiting frame payloads to `max_payload_size` bytes.
    ///
    /// Masked frames are accepted and unmasked on extraction.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
            accept_masked: true,
        }
    }

    /// Rejects masked frames with [`WebSocketError::MaskedFrame`].
    ///
    /// A client uses this policy for traffic coming from a server, which must never mask.
    pub fn reject_masked(mut self) -> Self {
        self.accept_masked = false;
        self
    }

    /// Returns `true` if a frame header has been (partially) consumed.
    pub fn is_mid_frame(&self) -> bool {
        self.state.is_some()
    }

    /// Decodes the next frame from `src`.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: a complete frame, unmasked.
    /// - `Ok(None)`: more data is needed; the parse progress is kept.
    /// - `Err(WebSocketError)`: the stream violates the framing protocol.
    pub fn decode(&mut self, src: &mut ChunkQueue) -> Result<Option<Frame>, WebSocketError> {
        loop {
            match self.state.take() {
                None => {
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let base = src.consume(2);
                    let fin = base[0] & 0b1000_0000 != 0;

                    if base[0] & 0b0111_0000 != 0 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }

                    let opcode = OpCode::try_from(base[0] & 0b0000_1111)?;
                    let masked = base[1] & 0b1000_0000 != 0;
                    let length_code = base[1] & 0x7F;

                    if masked && !self.accept_masked {
                        return Err(WebSocketError::MaskedFrame);
                    }

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        extra,
                        length_code,
                        header_size: extra + masked as usize * 4,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.len() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => usize::from(src.get_u16()),
                        _ => {
                            let len = src.get_u64();
                            if len & (1 << 63) != 0 {
                                return Err(WebSocketError::MalformedLength);
                            }
                            usize::try_from(len).map_err(|_| WebSocketError::FrameTooLarge)?
                        }
                    };

                    let mask = header.masked.then(|| src.get_array4());

                    if header.opcode.is_control() {
                        if !header.fin {
                            return Err(WebSocketError::ControlFrameFragmented);
                        }
                        if payload_len > MAX_CONTROL_PAYLOAD {
                            return Err(WebSocketError::ControlFrameTooLarge);
                        }
                    }
                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.len() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let payload = match mask {
                        Some(key) => {
                            let mut payload = src.consume_mut(payload_len);
                            mask::apply_mask(&mut payload, key);
                            payload.freeze()
                        }
                        None => src.consume(payload_len),
                    };

                    break Ok(Some(Frame::new(header.fin, header.opcode, None, payload)));
                }
            }
        }
    }
}

/// WebSocket frame encoder for the transport's write buffer.
///
/// A masking encoder assigns a fresh random key to every frame that does not already
/// carry one, as required for client-to-server traffic.
pub struct Encoder {
    masked: bool,
}

impl Encoder {
    /// Creates an encoder; `masked` selects client (masked) framing.
    pub fn new(masked: bool) -> Self {
        Self { masked }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = match frame.mask() {
            None if self.masked => frame.with_mask(mask::random_key()),
            _ => frame,
        };

        frame.encode_into(dst);
        Ok(())
    }
}
