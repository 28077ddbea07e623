//! Payload masking (RFC 6455 Section 5.3).
//!
//! Masking XORs each payload byte with the key byte at the same position modulo 4.
//! The operation is its own inverse, so the same routine masks and unmasks.
use bytes::BytesMut;

/// Masks or unmasks `buf` in place.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        for (byte, key) in word.iter_mut().zip(mask) {
            *byte ^= key;
        }
    }
    // the remainder starts on a multiple of 4, so the key restarts at index 0
    for (byte, key) in words.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// Appends a masked copy of `src` to `dst`, leaving `src` untouched.
#[inline]
pub fn mask_into(dst: &mut BytesMut, src: &[u8], mask: [u8; 4]) {
    let start = dst.len();
    dst.extend_from_slice(src);
    apply_mask(&mut dst[start..], mask);
}

/// Draws a fresh masking key.
///
/// `rand::random` is backed by the thread-local ChaCha generator, which is
/// cryptographically secure and periodically reseeded from the OS.
#[inline]
pub fn random_key() -> [u8; 4] {
    rand::random()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    #[test]
    fn test_mask_known_vector() {
        let mut data = [0x10, 0x20, 0x30];
        apply_mask(&mut data, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(data, [0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_mask_unmask_identity() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let original = b"Hello, World! This is a test message with various lengths.";

        let mut data = original.to_vec();
        apply_mask(&mut data, mask);
        assert_ne!(&data[..], &original[..]);

        apply_mask(&mut data, mask);
        assert_eq!(&data[..], &original[..]);
    }

    #[test]
    fn test_matches_bytewise_for_every_length() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        for size in 0..=67 {
            let data: Vec<u8> = (0..size).map(|i| (i * 7) as u8).collect();

            let mut expected = data.clone();
            mask_bytewise(&mut expected, mask);

            let mut actual = data.clone();
            apply_mask(&mut actual, mask);

            assert_eq!(expected, actual, "size {size}");
        }
    }

    #[test]
    fn test_mask_into_leaves_source_untouched() {
        let mask = [0xFF, 0x00, 0xFF, 0x00];
        let src = vec![0x00, 0x11, 0x22, 0x33, 0x44];
        let mut dst = BytesMut::from(&b"hd"[..]);

        mask_into(&mut dst, &src, mask);

        assert_eq!(src, vec![0x00, 0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&dst[..], &[b'h', b'd', 0xFF, 0x11, 0xDD, 0x33, 0xBB][..]);
    }

    #[test]
    fn test_zero_mask_is_identity() {
        let mut data = b"Test data".to_vec();
        apply_mask(&mut data, [0; 4]);
        assert_eq!(&data[..], b"Test data");
    }
}
