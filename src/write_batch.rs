//! Byte-encoded batch of multi-version writes, replayable into a memtable in one shot
//! via `insert_into`. Wire format:
//!
//! `fixed64(base_sequence) || fixed32(count) || record*`
//!
//! where each record is one of:
//!   `0x01 || varint32(key_len) || key || fixed64(valid_time) || varint32(val_len) || val`  (Put)
//!   `0x00 || varint32(key_len) || key || fixed64(valid_time)`                               (Delete)
//!
//! `insert_into` assigns each record the sequence `base_sequence + i`, in encounter
//! order, matching the order `Put`/`Delete` were called in (`Append` adds another
//! batch's records after the receiver's, renumbering nothing — sequence assignment
//! happens only at `insert_into` time, by position).

use log::warn;

use crate::cmp::InternalCmp;
use crate::codec::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, put_fixed32, put_fixed64,
    put_length_prefixed_slice,
};
use crate::error::{Result, Status, StatusCode};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValidTime, ValueType};

const HEADER_LEN: usize = 12;
const DELETE_TAG: u8 = 0;
const PUT_TAG: u8 = 1;

/// A sequence of `Put`/`Delete` operations, each carrying its own `valid_time`, bundled
/// into one byte buffer for atomic replay into a memtable.
#[derive(Clone, Debug)]
pub struct WriteBatchMV {
    rep: Vec<u8>,
}

impl Default for WriteBatchMV {
    fn default() -> Self {
        WriteBatchMV::new()
    }
}

impl WriteBatchMV {
    pub fn new() -> WriteBatchMV {
        let mut rep = Vec::with_capacity(HEADER_LEN);
        put_fixed64(&mut rep, 0);
        put_fixed32(&mut rep, 0);
        WriteBatchMV { rep }
    }

    pub fn put(&mut self, key: &[u8], valid_time: ValidTime, value: &[u8]) {
        let count = self.count() + 1;
        self.rep.push(PUT_TAG);
        put_length_prefixed_slice(&mut self.rep, key);
        put_fixed64(&mut self.rep, valid_time);
        put_length_prefixed_slice(&mut self.rep, value);
        self.set_count(count);
    }

    pub fn delete(&mut self, key: &[u8], valid_time: ValidTime) {
        let count = self.count() + 1;
        self.rep.push(DELETE_TAG);
        put_length_prefixed_slice(&mut self.rep, key);
        put_fixed64(&mut self.rep, valid_time);
        self.set_count(count);
    }

    pub fn clear(&mut self) {
        self.rep.truncate(HEADER_LEN);
        self.set_count(0);
    }

    /// Appends `src`'s records after the receiver's own, preserving each batch's
    /// internal record order. The receiver's sequence and count header stay; only
    /// `count` grows.
    pub fn append(&mut self, src: &WriteBatchMV) {
        let count = self.count() + src.count();
        self.rep.extend_from_slice(&src.rep[HEADER_LEN..]);
        self.set_count(count);
    }

    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..12])
    }

    pub fn set_count(&mut self, count: u32) {
        let mut buf = Vec::new();
        put_fixed32(&mut buf, count);
        self.rep[8..12].copy_from_slice(&buf);
    }

    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep[0..8])
    }

    pub fn set_sequence(&mut self, seq: SequenceNumber) {
        let mut buf = Vec::new();
        put_fixed64(&mut buf, seq);
        self.rep[0..8].copy_from_slice(&buf);
    }

    pub fn contents(&self) -> &[u8] {
        &self.rep
    }

    /// Replaces the whole byte representation, including the header. Used to feed a
    /// batch that arrived over the wire (or, in tests, a deliberately truncated one)
    /// back through the same accessors.
    pub fn set_contents(&mut self, contents: &[u8]) {
        self.rep = contents.to_vec();
    }
}

fn corrupt(parsed: u32, expected: u32) -> Status {
    warn!(
        "write batch corruption: parsed {} of {} records before truncation",
        parsed, expected
    );
    Status::new(StatusCode::Corruption, "truncated WriteBatchMV")
}

/// Replays `batch` into `mem`, assigning sequence numbers `batch.sequence()..` in
/// record order. Any record successfully parsed before a truncation is hit is still
/// applied to `mem`; only the as-yet-unparsed remainder is lost.
pub fn insert_into<C: InternalCmp>(batch: &WriteBatchMV, mem: &mut MemTable<C>) -> Result<()> {
    let expected = batch.count();
    let mut seq = batch.sequence();
    let mut data = &batch.rep[HEADER_LEN..];
    let mut found = 0u32;

    while !data.is_empty() {
        let tag = data[0];
        data = &data[1..];

        let key = match get_length_prefixed_slice(data) {
            Some((k, n)) => {
                data = &data[n..];
                k
            }
            None => return Err(corrupt(found, expected)),
        };

        if data.len() < 8 {
            return Err(corrupt(found, expected));
        }
        let valid_time = decode_fixed64(&data[..8]);
        data = &data[8..];

        match tag {
            PUT_TAG => {
                let value = match get_length_prefixed_slice(data) {
                    Some((v, n)) => {
                        data = &data[n..];
                        v
                    }
                    None => return Err(corrupt(found, expected)),
                };
                mem.add_mv(seq, ValueType::Value, key, valid_time, value);
            }
            DELETE_TAG => {
                mem.add_mv(seq, ValueType::Deletion, key, valid_time, b"");
            }
            _ => return Err(corrupt(found, expected)),
        }

        seq += 1;
        found += 1;
    }

    if found != expected {
        return Err(corrupt(found, expected));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::{DefaultCmp, MVInternalKeyComparator};
    use crate::key_types;
    use crate::types::{LdbIterator, ValidTimePeriod};
    use std::sync::Arc;

    fn mv_table() -> MemTable<MVInternalKeyComparator> {
        MemTable::new(MVInternalKeyComparator(Arc::new(Box::new(DefaultCmp))))
    }

    /// Renders a replayed batch the way the reference test suite's `PrintContents`
    /// helper does: one `Put(key, valid_time, value)@seq` or `Delete(key,
    /// valid_time)@seq` entry per record, in newest-sequence-first iteration order.
    fn print_contents(batch: &WriteBatchMV) -> String {
        let mut mem = mv_table();
        let result = insert_into(batch, &mut mem);
        let mut state = String::new();
        let mut count = 0u32;
        let mut iter = mem.new_iterator();
        iter.seek_to_first();
        while iter.valid() {
            let parsed = key_types::parse_mv_internal_key(iter.key()).unwrap();
            match parsed.value_type {
                ValueType::Value => {
                    state.push_str("Put(");
                    state.push_str(std::str::from_utf8(parsed.user_key).unwrap());
                    state.push_str(", ");
                    state.push_str(&parsed.valid_time.to_string());
                    state.push_str(", ");
                    state.push_str(std::str::from_utf8(iter.value()).unwrap());
                    state.push(')');
                }
                ValueType::Deletion => {
                    state.push_str("Delete(");
                    state.push_str(std::str::from_utf8(parsed.user_key).unwrap());
                    state.push_str(", ");
                    state.push_str(&parsed.valid_time.to_string());
                    state.push(')');
                }
            }
            count += 1;
            state.push('@');
            state.push_str(&parsed.sequence.to_string());
            iter.next();
        }
        if result.is_err() {
            state.push_str("ParseError()");
        } else if count != batch.count() {
            state.push_str("CountMismatch()");
        }
        state
    }

    #[test]
    fn test_empty_batch() {
        let batch = WriteBatchMV::new();
        assert_eq!(print_contents(&batch), "");
        assert_eq!(batch.count(), 0);
    }

    #[test]
    fn test_multiple_entries() {
        let mut batch = WriteBatchMV::new();
        batch.put(b"foo", 1_700_000_000, b"bar");
        batch.delete(b"box", 1_700_000_000);
        batch.put(b"baz", 1_700_000_000, b"boo");
        batch.set_sequence(100);

        assert_eq!(batch.sequence(), 100);
        assert_eq!(batch.count(), 3);
        assert_eq!(
            print_contents(&batch),
            "Put(baz, 1700000000, boo)@102\
             Delete(box, 1700000000)@101\
             Put(foo, 1700000000, bar)@100"
        );
    }

    #[test]
    fn test_corruption_preserves_parsed_prefix() {
        let mut batch = WriteBatchMV::new();
        batch.put(b"foo", 1_700_000_000, b"bar");
        batch.delete(b"box", 1_700_000_000);
        batch.set_sequence(200);

        let truncated = batch.contents()[..batch.contents().len() - 1].to_vec();
        batch.set_contents(&truncated);

        assert_eq!(
            print_contents(&batch),
            "Put(foo, 1700000000, bar)@200ParseError()"
        );
    }

    #[test]
    fn test_append() {
        let mut b1 = WriteBatchMV::new();
        let mut b2 = WriteBatchMV::new();
        b1.set_sequence(200);
        b2.set_sequence(300);

        b1.append(&b2);
        assert_eq!(print_contents(&b1), "");

        b2.put(b"a", 1, b"va");
        b1.append(&b2);
        assert_eq!(print_contents(&b1), "Put(a, 1, va)@200");

        b2.clear();
        b2.put(b"b", 1, b"vb");
        b1.append(&b2);
        assert_eq!(
            print_contents(&b1),
            "Put(a, 1, va)@200Put(b, 1, vb)@201"
        );
    }

    #[test]
    fn test_insert_into_respects_valid_time() {
        let mut batch = WriteBatchMV::new();
        batch.put(b"k", 100, b"A");
        batch.put(b"k", 200, b"B");

        let mut mem = mv_table();
        insert_into(&batch, &mut mem).unwrap();

        let r = mem
            .get_mv(&key_types::MVLookupKey::new(b"k", 10, 150))
            .unwrap();
        assert_eq!(r.value, Some(b"A".to_vec()));
        assert_eq!(r.period, ValidTimePeriod::new(100, 200));
    }
}
