//! Binary encoding of internal keys (single-version and multi-version) and the
//! lookup-key / memtable-record helpers built on top of them.
//!
//! Single-version internal key:  `user_key || fixed64(seq << 8 | type)`
//! Multi-version internal key:   `user_key || fixed64(seq << 8 | type) || fixed64(valid_time)`
//! Memtable record (either mode): `varint32(ikey_len) || ikey || varint32(val_len) || val`

use crate::codec::{
    decode_fixed64, get_length_prefixed_slice, put_fixed64, put_length_prefixed_slice,
    put_varint32, varint_length,
};
use crate::types::{
    SequenceNumber, ValidTime, ValueType, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};

/// A UserKey is the actual key supplied by the calling application, without any
/// internal decorations.
pub type UserKey<'a> = &'a [u8];

fn pack_tag(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER, "sequence number exceeds 56 bits");
    (seq << 8) | t as u64
}

/// Splits a packed tag word back into `(type, sequence)`.
pub fn parse_tag(tag: u64) -> (u8, SequenceNumber) {
    ((tag & 0xff) as u8, tag >> 8)
}

// ---- single-version internal key ----------------------------------------------

pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Appends the single-version internal key encoding of `(user_key, seq, t)` to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_tag(seq, t));
}

/// Parses a single-version internal key. Returns `None` if `key` is shorter than the
/// 8-byte tag.
pub fn parse_internal_key(key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if key.len() < 8 {
        return None;
    }
    let n = key.len();
    let tag = decode_fixed64(&key[n - 8..]);
    let (ty, seq) = parse_tag(tag);
    Some(ParsedInternalKey {
        user_key: &key[..n - 8],
        sequence: seq,
        value_type: ValueType::from_u8(ty)?,
    })
}

/// Returns the user-key prefix of a single-version internal key. Panics if `key` is
/// too short to be one.
pub fn extract_user_key(key: &[u8]) -> &[u8] {
    assert!(key.len() >= 8);
    &key[..key.len() - 8]
}

// ---- multi-version internal key ------------------------------------------------

pub struct ParsedMVInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
    pub valid_time: ValidTime,
}

/// Appends the multi-version internal key encoding of `(user_key, seq, t, valid_time)`
/// to `dst`.
pub fn append_mv_internal_key(
    dst: &mut Vec<u8>,
    user_key: &[u8],
    seq: SequenceNumber,
    t: ValueType,
    valid_time: ValidTime,
) {
    dst.extend_from_slice(user_key);
    put_fixed64(dst, pack_tag(seq, t));
    put_fixed64(dst, valid_time);
}

/// Parses a multi-version internal key. Returns `None` if `key` is shorter than the
/// 16-byte tag+valid_time trailer (property P2).
pub fn parse_mv_internal_key(key: &[u8]) -> Option<ParsedMVInternalKey<'_>> {
    if key.len() < 16 {
        return None;
    }
    let n = key.len();
    let valid_time = decode_fixed64(&key[n - 8..]);
    let tag = decode_fixed64(&key[n - 16..n - 8]);
    let (ty, seq) = parse_tag(tag);
    Some(ParsedMVInternalKey {
        user_key: &key[..n - 16],
        sequence: seq,
        value_type: ValueType::from_u8(ty)?,
        valid_time,
    })
}

/// Returns the user-key prefix of a multi-version internal key.
pub fn extract_mv_user_key(key: &[u8]) -> &[u8] {
    assert!(key.len() >= 16);
    &key[..key.len() - 16]
}

// ---- lookup keys -----------------------------------------------------------------

/// The memtable-key form of a single-version point lookup: a varint-prefixed internal
/// key built with `sequence` and `ValueTypeForSeek`, so that seeking lands on the
/// newest version with `sequence <= snapshot`.
pub struct LookupKey {
    key: Vec<u8>,
    key_offset: usize,
}

impl LookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber) -> LookupKey {
        let internal_key_size = user_key.len() + 8;
        let mut key =
            Vec::with_capacity(varint_length(internal_key_size as u64) + internal_key_size);
        put_varint32(&mut key, internal_key_size as u32);
        let key_offset = key.len();
        key.extend_from_slice(user_key);
        put_fixed64(&mut key, pack_tag(seq, VALUE_TYPE_FOR_SEEK));
        LookupKey { key, key_offset }
    }

    /// `varint32(len) || user_key || tag` — what the ordered map is seeked with.
    pub fn memtable_key(&self) -> &[u8] {
        &self.key
    }

    /// `user_key || tag`, without the outer length prefix.
    pub fn internal_key(&self) -> &[u8] {
        &self.key[self.key_offset..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.key[self.key_offset..self.key.len() - 8]
    }
}

/// The memtable-key form of a multi-version point lookup: `(user_key, snapshot_seq,
/// query valid_time)`.
pub struct MVLookupKey {
    key: Vec<u8>,
    key_offset: usize,
}

impl MVLookupKey {
    pub fn new(user_key: &[u8], seq: SequenceNumber, valid_time: ValidTime) -> MVLookupKey {
        let internal_key_size = user_key.len() + 16;
        let mut key =
            Vec::with_capacity(varint_length(internal_key_size as u64) + internal_key_size);
        put_varint32(&mut key, internal_key_size as u32);
        let key_offset = key.len();
        key.extend_from_slice(user_key);
        put_fixed64(&mut key, pack_tag(seq, VALUE_TYPE_FOR_SEEK));
        put_fixed64(&mut key, valid_time);
        MVLookupKey { key, key_offset }
    }

    pub fn memtable_key(&self) -> &[u8] {
        &self.key
    }

    pub fn internal_key(&self) -> &[u8] {
        &self.key[self.key_offset..]
    }

    pub fn user_key(&self) -> &[u8] {
        &self.key[self.key_offset..self.key.len() - 16]
    }

    pub fn valid_time(&self) -> ValidTime {
        decode_fixed64(&self.key[self.key.len() - 8..])
    }
}

// ---- memtable record layout -------------------------------------------------------

/// Byte length a `varint32(ikey_len) || ikey || varint32(val_len) || val` record
/// would take, given the already-computed internal-key and value lengths.
pub fn encoded_record_len(internal_key_len: usize, value_len: usize) -> usize {
    varint_length(internal_key_len as u64) + internal_key_len + varint_length(value_len as u64) + value_len
}

/// Builds a standalone (non-arena) memtable record. Used by tests and by
/// `WriteBatchMV` scratch encoding; the memtable itself writes directly into arena
/// memory using the same layout (see `memtable::MemTable::add_mv`).
pub fn build_memtable_record(internal_key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_record_len(internal_key.len(), value.len()));
    put_length_prefixed_slice(&mut buf, internal_key);
    put_length_prefixed_slice(&mut buf, value);
    buf
}

/// Splits a memtable record into `(internal_key, value)`. Returns `None` if either
/// length prefix is truncated.
pub fn parse_memtable_record(record: &[u8]) -> Option<(&[u8], &[u8])> {
    let (ikey, off) = get_length_prefixed_slice(record)?;
    let (val, _) = get_length_prefixed_slice(&record[off..])?;
    Some((ikey, val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_VALID_TIME;

    #[test]
    fn test_internal_key_roundtrip() {
        let keys: &[&[u8]] = &[b"", b"k", b"hello", b"longggggggggggggggggggggg"];
        let seqs: &[u64] = &[
            1,
            2,
            3,
            (1 << 8) - 1,
            1 << 8,
            (1 << 8) + 1,
            (1 << 16) - 1,
            1 << 16,
            (1 << 32) - 1,
        ];
        for &k in keys {
            for &s in seqs {
                let mut buf = Vec::new();
                append_internal_key(&mut buf, k, s, ValueType::Value);
                let parsed = parse_internal_key(&buf).unwrap();
                assert_eq!(parsed.user_key, k);
                assert_eq!(parsed.sequence, s);
                assert_eq!(parsed.value_type, ValueType::Value);
            }
        }
    }

    #[test]
    fn test_mv_internal_key_roundtrip() {
        // property P1
        let t = 1_620_000_000u64;
        let keys: &[&[u8]] = &[b"", b"k", b"hello", b"longggggggggggggggggggggg"];
        let seqs: &[u64] = &[1, 2, 3, (1 << 32) - 1, 1 << 32, (1 << 32) + 1];
        for &k in keys {
            for &s in seqs {
                let mut buf = Vec::new();
                append_mv_internal_key(&mut buf, k, s, ValueType::Value, t);
                let parsed = parse_mv_internal_key(&buf).unwrap();
                assert_eq!(parsed.user_key, k);
                assert_eq!(parsed.sequence, s);
                assert_eq!(parsed.value_type, ValueType::Value);
                assert_eq!(parsed.valid_time, t);
            }
        }
        let mut buf = Vec::new();
        append_mv_internal_key(&mut buf, b"hello", 1, ValueType::Deletion, MAX_VALID_TIME);
        let parsed = parse_mv_internal_key(&buf).unwrap();
        assert_eq!(parsed.value_type, ValueType::Deletion);
        assert_eq!(parsed.valid_time, MAX_VALID_TIME);
    }

    #[test]
    fn test_mv_internal_key_rejects_truncated() {
        // property P2
        assert!(parse_mv_internal_key(b"bar").is_none());
        let mut buf = Vec::new();
        append_mv_internal_key(&mut buf, b"hello", 1, ValueType::Value, 7);
        buf.pop();
        assert!(parse_mv_internal_key(&buf).is_none());
    }

    #[test]
    fn test_lookup_key() {
        let lk = LookupKey::new(b"abcde", 123);
        assert_eq!(lk.user_key(), b"abcde");
        let parsed = parse_internal_key(lk.internal_key()).unwrap();
        assert_eq!(parsed.sequence, 123);
        assert_eq!(parsed.value_type, VALUE_TYPE_FOR_SEEK);
    }

    #[test]
    fn test_mv_lookup_key() {
        let lk = MVLookupKey::new(b"xyabxy", 97, 555);
        assert_eq!(lk.user_key(), b"xyabxy");
        assert_eq!(lk.valid_time(), 555);
        let parsed = parse_mv_internal_key(lk.internal_key()).unwrap();
        assert_eq!(parsed.sequence, 97);
        assert_eq!(parsed.valid_time, 555);
    }

    #[test]
    fn test_memtable_record_roundtrip() {
        let mut ikey = Vec::new();
        append_mv_internal_key(&mut ikey, b"abc", 120, ValueType::Value, 10);
        let record = build_memtable_record(&ikey, b"123");
        let (got_ikey, got_val) = parse_memtable_record(&record).unwrap();
        assert_eq!(got_ikey, ikey.as_slice());
        assert_eq!(got_val, b"123");
    }
}
