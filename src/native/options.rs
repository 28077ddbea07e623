use std::time::Duration;

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit are rejected as a protocol error.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed size of a reassembled message, set to 2 MiB.
///
/// A fragmented message growing past this size fails the connection.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Number of bytes requested from the transport per read, set to 64 KiB.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration options for a WebSocket connection.
///
/// `Options` governs payload size limits, UTF-8 validation, the socket setup of
/// [`crate::WebSocket::connect`] and how long the opening handshake may take.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Maximum allowed payload size of a single incoming frame, in bytes.
    ///
    /// Default: 1 MiB as defined in [`MAX_PAYLOAD_READ`]
    pub max_payload_read: Option<usize>,

    /// Maximum size of a message reassembled from fragments.
    ///
    /// Default: 2 MiB as defined in [`MAX_READ_BUFFER`], or twice the configured
    /// `max_payload_read` value if that is set.
    pub max_read_buffer: Option<usize>,

    /// Whether received text messages are validated as UTF-8.
    ///
    /// Default: `false`
    pub check_utf8: bool,

    /// Whether `TCP_NODELAY` is set on sockets opened by [`crate::WebSocket::connect`].
    ///
    /// Default: `false`
    pub no_delay: bool,

    /// Bytes requested from the transport per read.
    ///
    /// Default: 64 KiB as defined in [`READ_CHUNK_SIZE`]
    pub read_chunk_size: Option<usize>,

    /// Upper bound for connecting and completing the opening handshake.
    ///
    /// Default: no timeout
    pub handshake_timeout: Option<Duration>,

    /// Whether masked frames from the server are unmasked instead of failing the connection.
    ///
    /// Default: `false`
    pub accept_masked_frames: bool,
}

impl Options {
    /// Sets the maximum allowed payload size of a single incoming frame.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum size of a reassembled message.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Enables UTF-8 validation for incoming text messages.
    ///
    /// A text message failing validation fails the connection with close code 1007.
    pub fn with_utf8(self) -> Self {
        Self {
            check_utf8: true,
            ..self
        }
    }

    /// Sets `TCP_NODELAY` on connections opened by [`crate::WebSocket::connect`].
    pub fn with_no_delay(self) -> Self {
        Self {
            no_delay: true,
            ..self
        }
    }

    /// Sets how many bytes are requested from the transport per read.
    pub fn with_read_chunk_size(self, size: usize) -> Self {
        Self {
            read_chunk_size: Some(size.max(1)),
            ..self
        }
    }

    /// Bounds the time spent connecting and handshaking.
    ///
    /// Exceeding it fails the connect with [`crate::WebSocketError::Timeout`].
    pub fn with_handshake_timeout(self, timeout: Duration) -> Self {
        Self {
            handshake_timeout: Some(timeout),
            ..self
        }
    }

    /// Tolerates masked frames from the server, unmasking them on receipt.
    pub fn with_masked_frames(self) -> Self {
        Self {
            accept_masked_frames: true,
            ..self
        }
    }

    pub(crate) fn payload_limit(&self) -> usize {
        self.max_payload_read.unwrap_or(MAX_PAYLOAD_READ)
    }

    pub(crate) fn message_limit(&self) -> usize {
        self.max_read_buffer.unwrap_or_else(|| {
            self.max_payload_read
                .map(|size| size.saturating_mul(2))
                .unwrap_or(MAX_READ_BUFFER)
        })
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.read_chunk_size.unwrap_or(READ_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.payload_limit(), MAX_PAYLOAD_READ);
        assert_eq!(options.message_limit(), MAX_READ_BUFFER);
        assert_eq!(options.chunk_size(), READ_CHUNK_SIZE);
        assert!(!options.check_utf8);
        assert!(!options.accept_masked_frames);
    }

    #[test]
    fn test_message_limit_follows_payload_limit() {
        let options = Options::default().with_max_payload_read(100);
        assert_eq!(options.message_limit(), 200);

        let options = options.with_max_read_buffer(150);
        assert_eq!(options.message_limit(), 150);
    }
}
