//! Receive buffer and message reassembly.
//!
//! The [`Reassembler`] owns everything the receive path needs between reads: the
//! [`ChunkQueue`] of unconsumed bytes, the [`Decoder`]'s partial header state and the
//! fragments of the data message being reassembled. It performs no I/O; the connection
//! feeds it raw chunks and dispatches the events it returns.
//!
//! Control frames may arrive between the fragments of a data message. They are emitted
//! immediately and leave the message in progress untouched.
use bytes::{Bytes, BytesMut};

use crate::{
    buffer::ChunkQueue,
    codec::Decoder,
    event::Event,
    frame::{Frame, OpCode},
    Result, WebSocketError,
};

/// A fragmented data message in progress.
struct Fragment {
    /// Opcode of the first frame; continuation frames inherit it.
    opcode: OpCode,
    /// Payloads received so far, in order.
    chunks: Vec<Bytes>,
    /// Sum of the lengths of `chunks`.
    total_len: usize,
}

/// Incremental decoder turning raw transport chunks into [`Event`]s.
pub struct Reassembler {
    buffer: ChunkQueue,
    decoder: Decoder,
    fragment: Option<Fragment>,
    /// Limit on the size of a reassembled message.
    max_message_size: usize,
    check_utf8: bool,
    /// Set after a close frame; further input is discarded.
    is_closed: bool,
    /// Set after a protocol error; further input is refused.
    failed: bool,
}

impl Reassembler {
    /// Creates a reassembler around `decoder`, limiting reassembled messages to
    /// `max_message_size` bytes.
    pub fn new(decoder: Decoder, max_message_size: usize) -> Self {
        Self {
            buffer: ChunkQueue::new(),
            decoder,
            fragment: None,
            max_message_size,
            check_utf8: false,
            is_closed: false,
            failed: false,
        }
    }

    /// Enables UTF-8 validation of completed text messages.
    pub fn with_utf8(mut self) -> Self {
        self.check_utf8 = true;
        self
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` while a fragmented message is being reassembled.
    pub fn in_message(&self) -> bool {
        self.fragment.is_some()
    }

    /// Returns `true` once a close frame was received or a protocol error occurred.
    pub fn is_closed(&self) -> bool {
        self.is_closed || self.failed
    }

    /// Appends a received chunk and decodes every frame it completes.
    ///
    /// Returns the resulting events in arrival order. Partial frames stay buffered until
    /// later calls supply the rest. After a close frame, input is silently discarded.
    ///
    /// # Errors
    /// Any protocol violation is fatal: the error is returned and every later call fails
    /// with [`WebSocketError::ConnectionClosed`].
    pub fn append(&mut self, chunk: impl Into<Bytes>) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        self.append_into(chunk, &mut events)?;
        Ok(events)
    }

    /// Like [`Reassembler::append`], pushing events into `events`.
    ///
    /// Events decoded before an error are still pushed.
    pub fn append_into(&mut self, chunk: impl Into<Bytes>, events: &mut Vec<Event>) -> Result<()> {
        if self.failed {
            return Err(WebSocketError::ConnectionClosed);
        }
        if self.is_closed {
            return Ok(());
        }

        self.buffer.append(chunk);

        loop {
            let frame = match self.decoder.decode(&mut self.buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.poison(err)),
            };

            match self.on_frame(frame) {
                Ok(Some(event)) => {
                    let closing = matches!(event, Event::Close { .. });
                    events.push(event);
                    if closing {
                        self.is_closed = true;
                        self.buffer.clear();
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(err) => return Err(self.poison(err)),
            }
        }
    }

    fn poison(&mut self, err: WebSocketError) -> WebSocketError {
        #[cfg(feature = "logging")]
        log::debug!("reassembly failed: {err}");

        self.failed = true;
        self.fragment = None;
        self.buffer.clear();
        err
    }

    fn on_frame(&mut self, frame: Frame) -> Result<Option<Event>> {
        #[cfg(feature = "logging")]
        log::trace!(
            "<< fin={} {:?} len={}",
            frame.fin,
            frame.opcode,
            frame.payload.len()
        );

        match frame.opcode {
            OpCode::Close => on_close(&frame).map(Some),
            OpCode::Ping => Ok(Some(Event::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Event::Pong(frame.payload))),
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return self.complete(frame.opcode, frame.payload).map(Some);
                }

                self.fragment = Some(Fragment {
                    opcode: frame.opcode,
                    total_len: frame.payload.len(),
                    chunks: vec![frame.payload],
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(fragment) = self.fragment.as_mut() else {
                    return Err(WebSocketError::InvalidContinuationFrame);
                };

                fragment.total_len += frame.payload.len();
                fragment.chunks.push(frame.payload);
                let total_len = fragment.total_len;
                self.check_size(total_len)?;

                if !frame.fin {
                    return Ok(None);
                }

                let Some(fragment) = self.fragment.take() else {
                    unreachable!()
                };

                let mut message = BytesMut::with_capacity(fragment.total_len);
                for chunk in &fragment.chunks {
                    message.extend_from_slice(chunk);
                }

                self.complete(fragment.opcode, message.freeze()).map(Some)
            }
        }
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len > self.max_message_size {
            Err(WebSocketError::FrameTooLarge)
        } else {
            Ok(())
        }
    }

    fn complete(&self, opcode: OpCode, payload: Bytes) -> Result<Event> {
        let is_binary = opcode == OpCode::Binary;
        if !is_binary && self.check_utf8 && !is_utf8(&payload) {
            return Err(WebSocketError::InvalidUTF8);
        }

        Ok(Event::Message { payload, is_binary })
    }
}

fn on_close(frame: &Frame) -> Result<Event> {
    match frame.payload.len() {
        0 => Ok(Event::Close {
            code: None,
            reason: Bytes::new(),
        }),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let code = frame.close_code();
            if let Some(code) = code.filter(|code| !code.is_allowed()) {
                return Err(WebSocketError::InvalidCloseCode(code.into()));
            }

            let reason = frame.close_reason();
            if !is_utf8(&reason) {
                return Err(WebSocketError::InvalidUTF8);
            }

            Ok(Event::Close { code, reason })
        }
    }
}

#[inline]
fn is_utf8(payload: &[u8]) -> bool {
    #[cfg(not(feature = "simd"))]
    return std::str::from_utf8(payload).is_ok();
    #[cfg(feature = "simd")]
    return simdutf8::basic::from_utf8(payload).is_ok();
}
