//! Accumulator for bytes received from the transport but not yet consumed by the decoder.
//!
//! Reads hand over owned chunks of unpredictable size. The queue keeps them in arrival
//! order together with a running byte count, and [`ChunkQueue::consume`] removes an exact
//! number of bytes from the front, splitting a chunk when the boundary falls inside it.
use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// Ordered queue of received chunks.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk at the back of the queue. Empty chunks are dropped.
    pub fn append(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Total number of buffered bytes across all chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Removes exactly `n` bytes from the front and returns them contiguously.
    ///
    /// When the bytes lie within the front chunk they are split off without copying.
    ///
    /// # Panics
    /// Panics if fewer than `n` bytes are buffered. Callers check [`ChunkQueue::len`] first.
    pub fn consume(&mut self, n: usize) -> Bytes {
        assert!(n <= self.len, "consume({n}) with only {} bytes buffered", self.len);
        self.len -= n;

        if n == 0 {
            return Bytes::new();
        }

        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let Some(front) = self.chunks.front_mut() else {
                unreachable!("length counter out of sync with chunks");
            };

            if front.len() > remaining {
                out.extend_from_slice(&front.split_to(remaining));
                remaining = 0;
            } else {
                remaining -= front.len();
                out.extend_from_slice(front);
                self.chunks.pop_front();
            }
        }

        out.freeze()
    }

    /// Removes exactly `n` bytes from the front into a freshly allocated mutable buffer.
    pub fn consume_mut(&mut self, n: usize) -> BytesMut {
        BytesMut::from(&self.consume(n)[..])
    }

    /// Reads a big-endian `u16` from the front.
    pub fn get_u16(&mut self) -> u16 {
        self.consume(2).get_u16()
    }

    /// Reads a big-endian `u64` from the front.
    pub fn get_u64(&mut self) -> u64 {
        self.consume(8).get_u64()
    }

    /// Reads a 4 byte array from the front.
    pub fn get_array4(&mut self) -> [u8; 4] {
        let bytes = self.consume(4);
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }

    /// Drops every buffered byte.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(chunks: &[&'static [u8]]) -> ChunkQueue {
        let mut q = ChunkQueue::new();
        for chunk in chunks {
            q.append(Bytes::from_static(chunk));
        }
        q
    }

    #[test]
    fn test_append_tracks_length() {
        let q = queue(&[b"abc", b"", b"de"]);
        assert_eq!(q.len(), 5);
        assert_eq!(q.chunk_count(), 2);
    }

    #[test]
    fn test_consume_within_front_chunk() {
        let mut q = queue(&[b"abcdef", b"gh"]);

        assert_eq!(q.consume(2), Bytes::from_static(b"ab"));
        assert_eq!(q.len(), 6);
        assert_eq!(q.chunk_count(), 2);

        assert_eq!(q.consume(4), Bytes::from_static(b"cdef"));
        assert_eq!(q.chunk_count(), 1);
    }

    #[test]
    fn test_consume_across_chunks_keeps_remainder() {
        let mut q = queue(&[b"ab", b"cde", b"fgh"]);

        assert_eq!(q.consume(4), Bytes::from_static(b"abcd"));
        assert_eq!(q.len(), 4);
        assert_eq!(q.chunk_count(), 2);

        assert_eq!(q.consume(4), Bytes::from_static(b"efgh"));
        assert!(q.is_empty());
        assert_eq!(q.chunk_count(), 0);
    }

    #[test]
    fn test_consume_zero() {
        let mut q = queue(&[b"x"]);
        assert!(q.consume(0).is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_integer_readers_span_chunks() {
        let mut q = queue(&[
            &[0x01],
            &[0x2C, 0, 0, 0],
            &[0, 0, 0x01, 0x11, 0x70],
            b"\x01\x02\x03\x04",
        ]);

        assert_eq!(q.get_u16(), 300);
        assert_eq!(q.get_u64(), 70_000);
        assert_eq!(q.get_array4(), [1, 2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_over_consume_panics() {
        let mut q = queue(&[b"ab"]);
        q.consume(3);
    }
}
