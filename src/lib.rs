//! # rawws
//! Client-side implementation of the WebSocket protocol (RFC 6455) running over a raw
//! bidirectional byte stream.
//!
//! The crate performs the opening handshake, encodes outgoing application data into
//! (optionally fragmented) masked frames, and decodes an incoming byte stream, which may
//! deliver frames split across arbitrary read boundaries, back into complete messages and
//! control signals. Decoded traffic is delivered to callbacks registered per event kind.
//!
//! # Features
//! The crate provides several optional features that can be enabled in your `Cargo.toml`:
//!
//! - `logging`: Enables debug logging for the handshake, frame processing and connection
//!   lifecycle using the `log` crate.
//!
//! - `simd`: Validates UTF-8 text messages with `simdutf8` when UTF-8 validation is enabled.
//!
//! - `json`: Enables [`WebSocket::send_json`] for sending serializable values as text messages.
//!
//! # Client Example
//! ```no_run
//! use rawws::{Event, EventKind, WebSocket};
//!
//! #[tokio::main]
//! async fn main() -> rawws::Result<()> {
//!     let ws = WebSocket::connect("ws://127.0.0.1:3333/chat".parse()?)
//!         .on(EventKind::Message, |event: &Event| {
//!             if let Event::Message { payload, is_binary: false } = event {
//!                 println!("{}", String::from_utf8_lossy(payload));
//!             }
//!         })
//!         .await?;
//!
//!     ws.send_text(r#"{"type":"join","data":"alice"}"#).await?;
//!     ws.hold().await;
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//! - [`frame`]: pure frame encoding and the [`frame::Frame`] type.
//! - [`buffer`]: the chunk accumulator backing incremental parsing.
//! - [`codec`]: the incremental frame decoder and the transport encoder.
//! - [`reassembly`]: fragment reassembly and control frame extraction.
//! - [`WebSocket`]: handshake, background receive loop, event dispatch and shutdown.
//!
//! # Memory Safety
//! - Maximum frame and message size limits (configurable through [`Options`])
//! - Control frames limited to 125 bytes and never fragmented
//! - Optional UTF-8 validation for text messages

#![cfg_attr(docsrs, feature(doc_cfg))]

mod native;

pub mod buffer;
pub mod close;
pub mod codec;
pub mod event;
pub mod frame;
mod mask;
pub mod reassembly;
mod stream;

use thiserror::Error;

pub use event::{Event, EventKind};
pub use native::*;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors fall into three groups:
///
/// - Handshake failures (bad URL or scheme, unexpected status, header or accept key mismatch),
///   which are returned from connect and never leave a half-open connection behind.
/// - Protocol errors (reserved opcodes, malformed lengths, invalid fragments or close frames),
///   which are fatal to an open connection.
/// - Transport errors (I/O failures after the connection is open).
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Occurs when a new text or binary frame starts while a fragmented message is still
    /// being reassembled.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// Indicates that a text message contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Occurs when receiving a continuation frame without a preceding initial frame.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// Returned when the handshake response carries a status other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Indicates that the "Upgrade" header of the handshake response is missing or is not
    /// "websocket".
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the "Connection" header of the handshake response is missing or is not
    /// "upgrade".
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The "Sec-WebSocket-Accept" header does not match the key sent in the request.
    #[error("Invalid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    /// Returned when attempting to perform operations on a closed WebSocket connection.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A close frame carried a 1 byte payload (close frames must be either empty or ≥2 bytes).
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A close frame carried a status code that must not appear on the wire.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved bits in the frame header are set.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A control frame (ping, pong, or close) was received with the FIN bit not set.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame declared a payload larger than 125 bytes.
    #[error("Control frame too large")]
    ControlFrameTooLarge,

    /// A frame or reassembled message exceeds the configured size limit.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A 64-bit extended payload length has its most significant bit set.
    #[error("Malformed extended payload length")]
    MalformedLength,

    /// A masked frame was received from the server.
    #[error("Received a masked frame from the server")]
    MaskedFrame,

    /// Indicates receipt of a frame with a reserved opcode value.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Returned when attempting to connect with a scheme other than "ws://" or "wss://".
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,

    /// The handshake did not complete within the configured timeout.
    #[error("Handshake timed out")]
    Timeout,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library that may occur during the handshake.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),

    /// The upgrade request could not be built from the URL.
    #[error(transparent)]
    InvalidRequest(#[from] hyper::http::Error),

    /// Occurs when serialization of JSON data fails.
    #[cfg(feature = "json")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WebSocketError {
    /// Returns `true` for violations of the framing protocol by the peer.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFragment
                | Self::InvalidUTF8
                | Self::InvalidContinuationFrame
                | Self::InvalidCloseFrame
                | Self::InvalidCloseCode(_)
                | Self::ReservedBitsNotZero
                | Self::ControlFrameFragmented
                | Self::ControlFrameTooLarge
                | Self::FrameTooLarge
                | Self::MalformedLength
                | Self::MaskedFrame
                | Self::InvalidOpCode(_)
        )
    }
}
