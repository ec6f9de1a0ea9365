//! Varint and fixed-width little-endian codec primitives, shared by `key_types` and
//! `write_batch` instead of each re-deriving the same varint32/fixed64 dance inline.

use integer_encoding::{FixedInt, VarInt};

/// Encodes `v` as a little-endian fixed64 and appends it to `dst`.
pub fn put_fixed64(dst: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    v.encode_fixed(&mut buf);
    dst.extend_from_slice(&buf);
}

/// Decodes a little-endian fixed64 from the first 8 bytes of `src`.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    FixedInt::decode_fixed(&src[..8]).expect("decode_fixed64: need >= 8 bytes")
}

/// Encodes `v` as a little-endian fixed32 and appends it to `dst`.
pub fn put_fixed32(dst: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 4];
    v.encode_fixed(&mut buf);
    dst.extend_from_slice(&buf);
}

/// Decodes a little-endian fixed32 from the first 4 bytes of `src`.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    FixedInt::decode_fixed(&src[..4]).expect("decode_fixed32: need >= 4 bytes")
}

/// Appends `v` to `dst` as a varint32.
pub fn put_varint32(dst: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 5];
    let n = v.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

/// Decodes a varint32 from the start of `src`, returning `(value, bytes_consumed)`.
pub fn decode_varint32(src: &[u8]) -> Option<(u32, usize)> {
    VarInt::decode_var(src)
}

/// Appends `s` to `dst` as `varint32(len) || bytes`.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, s: &[u8]) {
    put_varint32(dst, s.len() as u32);
    dst.extend_from_slice(s);
}

/// Decodes a `varint32(len) || bytes` slice from the start of `src`, returning
/// `(slice, bytes_consumed)`. Returns `None` if the varint or the trailing bytes are
/// truncated.
pub fn get_length_prefixed_slice(src: &[u8]) -> Option<(&[u8], usize)> {
    let (len, off) = decode_varint32(src)?;
    let len = len as usize;
    if src.len() < off + len {
        return None;
    }
    Some((&src[off..off + len], off + len))
}

/// Number of bytes `varint32`/`varint64` encoding of `v` would take.
pub fn varint_length(v: u64) -> usize {
    v.required_space()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed64_roundtrip() {
        for v in [0u64, 1, 255, 256, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_fixed64(&mut buf, v);
            assert_eq!(buf.len(), 8);
            assert_eq!(decode_fixed64(&buf), v);
        }
    }

    #[test]
    fn test_fixed32_roundtrip() {
        for v in [0u32, 1, 255, 256, u32::MAX] {
            let mut buf = Vec::new();
            put_fixed32(&mut buf, v);
            assert_eq!(buf.len(), 4);
            assert_eq!(decode_fixed32(&buf), v);
        }
    }

    #[test]
    fn test_length_prefixed_slice_roundtrip() {
        for s in [&b""[..], b"a", b"hello world"] {
            let mut buf = Vec::new();
            put_length_prefixed_slice(&mut buf, s);
            let (got, consumed) = get_length_prefixed_slice(&buf).unwrap();
            assert_eq!(got, s);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn test_length_prefixed_slice_truncated() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"hello");
        buf.truncate(buf.len() - 1);
        assert!(get_length_prefixed_slice(&buf).is_none());
    }
}
