//! Client connection for the Tokio runtime.
//!
//! A [`WebSocket`] owns one background task reading the transport. Every chunk it reads
//! is fed to a [`Reassembler`]; the resulting events are dispatched to the registered
//! callbacks in wire order. Writes from any clone of the handle are serialized through
//! a single framed writer, so frames never interleave on the wire.

mod builder;
mod handshake;
mod options;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf},
    sync::{watch, Mutex},
};
use tokio_util::codec::FramedWrite;
use url::Url;

use crate::{
    close::CloseCode,
    codec::{Decoder, Encoder},
    event::{Callback, Event, EventKind, Listeners, Registry},
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD},
    reassembly::Reassembler,
    Result, WebSocketError,
};

pub use builder::WebSocketBuilder;
pub use handshake::{accept_key, WS_GUID};
pub use options::{Options, MAX_PAYLOAD_READ, MAX_READ_BUFFER, READ_CHUNK_SIZE};

type Transport = TokioIo<Upgraded>;

type Writer = FramedWrite<WriteHalf<Transport>, Encoder>;

/// Lifecycle of a connection after the handshake succeeded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow in both directions.
    Open,
    /// The connection ended through a close handshake, initiated by either side.
    Closed,
    /// The connection ended because of a transport or protocol error.
    Failed,
}

impl ConnectionState {
    /// Returns `true` once the connection has ended.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// A client WebSocket connection.
///
/// Cloning yields another handle to the same connection. Incoming traffic is surfaced
/// exclusively through callbacks registered with [`WebSocket::on`] (or on the
/// [`WebSocketBuilder`]); outgoing traffic goes through the `send_*` methods.
///
/// # Termination
/// A connection ends exactly once, through the first of:
/// - a close frame from the peer: the close event carries the peer's code and reason,
///   the close frame is echoed and the state becomes [`ConnectionState::Closed`];
/// - [`WebSocket::close`]: a close frame is sent, the close event carries the given
///   reason and the state becomes [`ConnectionState::Closed`];
/// - a protocol error: an error event, a close frame with the matching status code,
///   a close event, and [`ConnectionState::Failed`];
/// - a transport error or end of stream: an error event and [`ConnectionState::Failed`].
///
/// No event is emitted after the connection ended, and [`WebSocket::hold`] returns.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

struct Shared {
    writer: Mutex<Writer>,
    listeners: Registry,
    /// Set by whichever termination path runs first.
    closing: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl WebSocket {
    /// Starts building a connection to `url` (`ws://` or `wss://`).
    ///
    /// Await the returned builder to connect, or pass an existing stream to
    /// [`WebSocketBuilder::handshake`].
    pub fn connect(url: Url) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }

    async fn handshake_priv<S>(
        url: Url,
        io: S,
        options: Options,
        listeners: Listeners,
    ) -> Result<WebSocket>
    where
        S: AsyncWrite + AsyncRead + Send + Unpin + 'static,
    {
        let key = handshake::generate_key();
        let req = handshake::request(&url, &key)?;

        let (mut sender, conn) = hyper::client::conn::http1::Builder::new()
            .title_case_headers(true)
            .handshake(TokioIo::new(io))
            .await?;

        tokio::spawn(async move {
            if let Err(_err) = conn.with_upgrades().await {
                #[cfg(feature = "logging")]
                log::error!("upgrading connection: {:?}", _err);
            }
        });

        let mut response = sender.send_request(req).await?;
        handshake::verify(&response, &key)?;

        let upgraded = hyper::upgrade::on(&mut response).await?;

        #[cfg(feature = "logging")]
        log::debug!("handshake with {url} complete");

        Ok(WebSocket::open(TokioIo::new(upgraded), &options, listeners))
    }

    fn open(transport: Transport, options: &Options, listeners: Listeners) -> Self {
        let (read, write) = tokio::io::split(transport);

        let mut decoder = Decoder::new(options.payload_limit());
        if !options.accept_masked_frames {
            decoder = decoder.reject_masked();
        }

        let mut reassembler = Reassembler::new(decoder, options.message_limit());
        if options.check_utf8 {
            reassembler = reassembler.with_utf8();
        }

        let (state, _) = watch::channel(ConnectionState::Open);
        let ws = Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(FramedWrite::new(write, Encoder::new(true))),
                listeners: Registry::new(listeners),
                closing: AtomicBool::new(false),
                state,
            }),
        };

        tokio::spawn(ws.clone().read_loop(read, reassembler, options.chunk_size()));
        ws
    }

    /// Registers `callback` for events of `kind`.
    ///
    /// Callbacks for the same kind run in registration order on the receive task.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.shared.listeners.register(kind, callback);
    }

    /// Sends one message made of `pieces`, one frame per piece.
    ///
    /// The first frame carries the text or binary opcode, later ones are continuation
    /// frames, and only the last has FIN set. No pieces produce a single empty frame.
    pub async fn send<I, P>(&self, is_binary: bool, pieces: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<Bytes>,
    {
        let opcode = if is_binary {
            OpCode::Binary
        } else {
            OpCode::Text
        };
        let pieces = pieces.into_iter().map(Into::into).collect();
        self.send_frames(fragment(opcode, pieces)).await
    }

    /// Sends a single-frame text message.
    pub async fn send_text(&self, text: impl Into<Bytes>) -> Result<()> {
        self.send(false, [text.into()]).await
    }

    /// Sends a single-frame binary message.
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(true, [data.into()]).await
    }

    /// Splits `payload` into frames of at most `fragment_size` bytes and sends them
    /// as one message.
    ///
    /// `opcode` must be [`OpCode::Text`] or [`OpCode::Binary`]. A `fragment_size` of 0
    /// sends the payload unfragmented.
    pub async fn send_fragmented(
        &self,
        opcode: OpCode,
        payload: impl Into<Bytes>,
        fragment_size: usize,
    ) -> Result<()> {
        if !matches!(opcode, OpCode::Text | OpCode::Binary) {
            return Err(WebSocketError::InvalidFragment);
        }

        let payload = payload.into();
        let pieces = if fragment_size == 0 || payload.len() <= fragment_size {
            vec![payload]
        } else {
            (0..payload.len())
                .step_by(fragment_size)
                .map(|start| payload.slice(start..payload.len().min(start + fragment_size)))
                .collect()
        };

        self.send_frames(fragment(opcode, pieces)).await
    }

    /// Serializes `data` as JSON and sends it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub async fn send_json<T: serde::Serialize>(&self, data: &T) -> Result<()> {
        let bytes = serde_json::to_vec(data)?;
        self.send_text(bytes).await
    }

    /// Sends a ping carrying `payload`, which must not exceed 125 bytes.
    pub async fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }
        self.send_frames(vec![Frame::ping(payload)]).await
    }

    /// Closes the connection with status 1000 and `reason`.
    ///
    /// The close frame is sent on a best-effort basis before the transport is shut down.
    /// The close event carries the full `reason`; on the wire it is cut to fit a control
    /// frame. Closing an already terminated connection does nothing.
    pub async fn close(&self, reason: impl Into<Bytes>) -> Result<()> {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let reason = reason.into();
        let wire_reason = truncate_reason(&reason, MAX_CONTROL_PAYLOAD - 2);
        self.shutdown(Some(Frame::close(CloseCode::Normal, wire_reason)))
            .await;

        self.shared.listeners.emit(&Event::Close {
            code: Some(CloseCode::Normal),
            reason,
        });
        self.finish(ConnectionState::Closed);
        Ok(())
    }

    /// Waits until the connection has ended.
    pub async fn hold(&self) {
        terminated(self.shared.state.subscribe()).await;
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while frames can be exchanged.
    pub fn is_connected(&self) -> bool {
        !self.shared.closing.load(Ordering::Acquire)
    }

    /// Returns `true` once the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    async fn send_frames(&self, frames: Vec<Frame>) -> Result<()> {
        if self.shared.closing.load(Ordering::Acquire) {
            return Err(WebSocketError::ConnectionClosed);
        }

        let mut writer = self.shared.writer.lock().await;
        for frame in frames {
            writer.feed(frame).await?;
        }
        writer.flush().await
    }

    async fn read_loop(
        self,
        mut read: ReadHalf<Transport>,
        mut reassembler: Reassembler,
        chunk_size: usize,
    ) {
        let terminated = terminated(self.shared.state.subscribe());
        tokio::pin!(terminated);

        let mut buf = BytesMut::with_capacity(chunk_size);
        loop {
            buf.reserve(chunk_size);

            let res = tokio::select! {
                biased;
                _ = &mut terminated => break,
                res = read.read_buf(&mut buf) => res,
            };

            match res {
                Ok(0) => {
                    let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
                    self.fail(eof.into()).await;
                    break;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if !self.on_chunk(&mut reassembler, chunk).await {
                        break;
                    }
                }
                Err(err) => {
                    self.fail(err.into()).await;
                    break;
                }
            }
        }

        #[cfg(feature = "logging")]
        log::debug!("receive loop ended in state {:?}", self.state());
    }

    /// Dispatches the events decoded from `chunk`. Returns `false` once the connection ended.
    async fn on_chunk(&self, reassembler: &mut Reassembler, chunk: Bytes) -> bool {
        if self.shared.closing.load(Ordering::Acquire) {
            return false;
        }

        let mut events = Vec::new();
        let res = reassembler.append_into(chunk, &mut events);

        for event in events {
            if self.shared.closing.load(Ordering::Acquire) {
                return false;
            }

            match event {
                Event::Ping(payload) => {
                    self.shared.listeners.emit(&Event::Ping(payload.clone()));
                    if let Err(err) = self.send_frames(vec![Frame::pong(payload)]).await {
                        self.fail(err).await;
                        return false;
                    }
                }
                Event::Close { code, reason } => {
                    self.on_peer_close(code, reason).await;
                    return false;
                }
                event => self.shared.listeners.emit(&event),
            }
        }

        if let Err(err) = res {
            self.on_protocol_error(err).await;
            return false;
        }

        true
    }

    async fn on_peer_close(&self, code: Option<CloseCode>, reason: Bytes) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        log::debug!("peer closed the connection with {code:?}");

        let echo = match code {
            Some(code) => Frame::close(code, b""),
            None => Frame::close_raw(Bytes::new()),
        };
        self.shutdown(Some(echo)).await;

        self.shared.listeners.emit(&Event::Close { code, reason });
        self.finish(ConnectionState::Closed);
    }

    async fn on_protocol_error(&self, err: WebSocketError) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        log::debug!("protocol error: {err}");

        let code = close_code_for(&err);
        let reason = Bytes::from(err.to_string());

        self.shared.listeners.emit(&Event::Error(err));
        self.shutdown(Some(Frame::close(code, &reason))).await;
        self.shared.listeners.emit(&Event::Close {
            code: Some(code),
            reason,
        });
        self.finish(ConnectionState::Failed);
    }

    async fn fail(&self, err: WebSocketError) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "logging")]
        log::debug!("transport error: {err}");

        self.shared.listeners.emit(&Event::Error(err));
        self.shutdown(None).await;
        self.finish(ConnectionState::Failed);
    }

    /// Writes `last` if given, then shuts the write side of the transport down.
    async fn shutdown(&self, last: Option<Frame>) {
        let mut writer = self.shared.writer.lock().await;
        if let Some(frame) = last {
            if let Err(_err) = writer.send(frame).await {
                #[cfg(feature = "logging")]
                log::debug!("sending close frame: {_err}");
            }
        }
        if let Err(_err) = writer.close().await {
            #[cfg(feature = "logging")]
            log::debug!("shutting down transport: {_err}");
        }
    }

    fn finish(&self, state: ConnectionState) {
        self.shared.state.send_replace(state);
    }
}

async fn terminated(mut state: watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|state| state.is_terminal()).await;
}

/// Maps a protocol error to the status code of the close frame it triggers.
fn close_code_for(err: &WebSocketError) -> CloseCode {
    match err {
        WebSocketError::FrameTooLarge => CloseCode::Size,
        WebSocketError::InvalidOpCode(_) => CloseCode::Unsupported,
        WebSocketError::InvalidUTF8 => CloseCode::Invalid,
        _ => CloseCode::Protocol,
    }
}

/// Cuts `reason` to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_reason(reason: &[u8], max: usize) -> &[u8] {
    if reason.len() <= max {
        return reason;
    }

    let mut end = max;
    while end > 0 && reason[end] & 0xC0 == 0x80 {
        end -= 1;
    }
    &reason[..end]
}

/// Lays out `pieces` as the frames of one message.
fn fragment(opcode: OpCode, pieces: Vec<Bytes>) -> Vec<Frame> {
    if pieces.is_empty() {
        return vec![Frame::new(true, opcode, None, Bytes::new())];
    }

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let opcode = if i == 0 { opcode } else { OpCode::Continuation };
            Frame::new(i == last, opcode, None, piece)
        })
        .collect()
}
