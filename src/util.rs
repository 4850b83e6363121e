//! Small self-contained helpers shared by the injection primitives and the
//! file I/O protocol: random integer generation for framing arithmetic,
//! base64 encodings in both the URL-safe and standard alphabets, MD5
//! digests, and fixed-size chunking for uploads.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use rand::Rng;

/// Size of each chunk uploaded by the file write protocol (§4.F).
pub const WRITE_CHUNK_SIZE: usize = 500;

/// A 4-digit (1000..=9999) random decimal integer, used for the header and
/// trailer arithmetic checks in the render framing protocol.
pub fn rand_4digit() -> u32 {
    rand::thread_rng().gen_range(1000..=9999)
}

/// Two independent 4-digit random integers, as used for `header_rand` and
/// `trailer_rand`.
pub fn rand_pair() -> [u32; 2] {
    [rand_4digit(), rand_4digit()]
}

/// URL-safe base64 encoding (`{code_b64}` placeholder), padding kept as-is.
pub fn url_safe_base64_encode(data: &str) -> String {
    URL_SAFE.encode(data.as_bytes())
}

/// Standard base64 encoding (`{code_b64p}` placeholder).
pub fn base64_encode(data: &str) -> String {
    STANDARD.encode(data.as_bytes())
}

/// Standard base64 encoding of raw bytes, used for upload chunks.
pub fn base64_encode_bytes(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// URL-safe base64 encoding of raw bytes, used for upload chunks.
pub fn url_safe_base64_encode_bytes(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// Decode a standard base64 string, as returned by a `read` payload.
pub fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data.trim())
}

/// Lower-case hex MD5 digest of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Split `data` into fixed-size chunks of at most `size` bytes, in order.
pub fn chunk_seq(data: &[u8], size: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rand_4digit_is_in_range() {
        for _ in 0..100 {
            let n = rand_4digit();
            assert!((1000..=9999).contains(&n));
        }
    }

    #[test]
    fn base64_roundtrip() {
        let encoded = base64_encode("hello world");
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn chunking_respects_size_and_order() {
        let data = b"0123456789";
        let chunks: Vec<&[u8]> = chunk_seq(data, 4).collect();
        assert_eq!(chunks, vec![&b"0123"[..], &b"4567"[..], &b"89"[..]]);
    }

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
