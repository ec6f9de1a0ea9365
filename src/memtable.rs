//! In-memory, ordered store of recent writes. Single-version mode (`add`/`get`) is
//! ordinary LevelDB-style MVCC over `(user_key, sequence)`; multi-version mode
//! (`add_mv`/`get_mv`/`get_mv_range`) additionally orders by an application-supplied
//! `valid_time`, so a single user key can carry many temporal versions at once. Which
//! mode a given memtable is in follows entirely from the comparator it was built with
//! (`cmp::InternalKeyComparator` vs `cmp::MVInternalKeyComparator`); callers are
//! expected to stick to the matching method family.
//!
//! Concurrency: one writer at a time (`add`/`add_mv` take `&mut self`), any number of
//! concurrent readers once a write has returned and become visible (`get`/`get_mv`/
//! `get_mv_range`/`new_iterator` take `&self`) — the same contract `skipmap::SkipMap`
//! documents.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use log::{debug, warn};

use crate::cmp::InternalCmp;
use crate::key_types::{self, build_memtable_record, LookupKey, MVLookupKey};
use crate::skipmap::{SkipMap, SkipMapIter};
use crate::types::{
    LdbIterator, ResultVersion, SequenceNumber, ValidTime, ValidTimePeriod, ValueType,
    MAX_SEQUENCE_NUMBER, MAX_VALID_TIME,
};

/// Outcome of a single-version point lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupResult {
    Value(Vec<u8>),
    Deleted,
}

/// Outcome of a multi-version point lookup: the version effective at the queried
/// instant (`None` if it's a tombstone) plus the half-open period it held over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MVLookupResult {
    pub value: Option<Vec<u8>>,
    pub period: ValidTimePeriod,
}

pub struct MemTable<C: InternalCmp> {
    map: SkipMap<C>,
    refs: AtomicUsize,
    /// Open end of the newest version's period in `get_mv`/`get_mv_range`. Always
    /// `MAX_VALID_TIME`: the newest version of any key is unbounded until superseded,
    /// regardless of what `valid_time` happened to be written most recently elsewhere
    /// in the table (the reference implementation never tracks a real high-water mark
    /// here either — see `memtable.cc`'s `AddMV`, which never touches it).
    valid_time_hi: AtomicU64,
}

impl<C: InternalCmp> MemTable<C> {
    pub fn new(cmp: C) -> MemTable<C> {
        debug!("creating new memtable");
        MemTable {
            map: SkipMap::new(cmp),
            refs: AtomicUsize::new(0),
            valid_time_hi: AtomicU64::new(MAX_VALID_TIME),
        }
    }

    pub fn approx_mem_usage(&self) -> usize {
        self.map.approx_memory()
    }

    /// Increments the reference count. Mirrors the reference-counted lifetime the
    /// wider store manages a memtable under (active + immutable-pending-flush); unlike
    /// that C++ model nothing here drops `self` on `unref` reaching zero, since that
    /// can't be done from behind a shared reference in Rust — the caller owning the
    /// last `Arc`/`Box` is responsible for actually dropping it once told to.
    pub fn ref_(&self) {
        self.refs.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Decrements the reference count. Returns `true` if it just reached zero, meaning
    /// the caller held the last reference and should drop this memtable now.
    pub fn unref(&self) -> bool {
        self.refs.fetch_sub(1, AtomicOrdering::SeqCst) == 1
    }

    fn reject_oversized_sequence(seq: SequenceNumber) -> bool {
        if seq > MAX_SEQUENCE_NUMBER {
            warn!(
                "sequence number {} exceeds the 56-bit limit, rejecting write",
                seq
            );
            true
        } else {
            false
        }
    }

    /// Inserts a single-version record for `(key, seq)`. `t` is `ValueType::Deletion`
    /// for a tombstone.
    pub fn add(&mut self, seq: SequenceNumber, t: ValueType, key: &[u8], value: &[u8]) {
        if Self::reject_oversized_sequence(seq) {
            return;
        }
        let mut ikey = Vec::new();
        key_types::append_internal_key(&mut ikey, key, seq, t);
        let record = build_memtable_record(&ikey, value);
        let ptr = self.map.arena.allocate_from(&record);
        self.map.insert_record(ptr);
    }

    /// Inserts a multi-version record for `(key, seq, valid_time)`.
    pub fn add_mv(
        &mut self,
        seq: SequenceNumber,
        t: ValueType,
        key: &[u8],
        valid_time: ValidTime,
        value: &[u8],
    ) {
        if Self::reject_oversized_sequence(seq) {
            return;
        }

        let mut ikey = Vec::new();
        key_types::append_mv_internal_key(&mut ikey, key, seq, t, valid_time);
        let record = build_memtable_record(&ikey, value);
        let ptr = self.map.arena.allocate_from(&record);
        self.map.insert_record(ptr);
    }

    /// Looks up the newest version of `lookup.user_key()` with
    /// `sequence <= lookup`'s snapshot. Returns `None` if no record for that user key
    /// is visible at all.
    pub fn get(&self, lookup: &LookupKey) -> Option<LookupResult> {
        let mut iter = self.map.iter();
        iter.seek(lookup.memtable_key());
        if !iter.valid() {
            return None;
        }

        let parsed = key_types::parse_internal_key(iter.key())?;
        if self
            .map
            .comparator()
            .user_cmp()
            .cmp(parsed.user_key, lookup.user_key())
            != Ordering::Equal
        {
            return None;
        }

        match parsed.value_type {
            ValueType::Value => Some(LookupResult::Value(iter.value().to_vec())),
            ValueType::Deletion => Some(LookupResult::Deleted),
        }
    }

    /// Looks up the version of `lookup.user_key()` effective at `lookup.valid_time()`,
    /// among versions with `sequence <= lookup`'s snapshot. Returns `None` if no
    /// record for that user key is visible at all.
    ///
    /// Unlike a plain point lookup, a gap can open up mid-walk: if the user key
    /// disappears while we're still walking older valid_times looking for the one
    /// that covers the query instant, that's treated as not-found rather than
    /// silently reporting whatever unrelated key the iterator happened to land on.
    pub fn get_mv(&self, lookup: &MVLookupKey) -> Option<MVLookupResult> {
        let mut iter = self.map.iter();
        iter.seek(lookup.memtable_key());
        if !iter.valid() {
            return None;
        }

        let first = key_types::parse_mv_internal_key(iter.key())?;
        if self
            .map
            .comparator()
            .user_cmp()
            .cmp(first.user_key, lookup.user_key())
            != Ordering::Equal
        {
            return None;
        }

        let mut hi = self.valid_time_hi.load(AtomicOrdering::SeqCst).min(MAX_VALID_TIME);
        let mut lo = first.valid_time;

        while lookup.valid_time() < lo {
            hi = lo;
            iter.next();
            if !iter.valid() {
                return None;
            }
            let parsed = key_types::parse_mv_internal_key(iter.key())?;
            if self
                .map
                .comparator()
                .user_cmp()
                .cmp(parsed.user_key, lookup.user_key())
                != Ordering::Equal
            {
                return None;
            }
            lo = parsed.valid_time;
        }

        let parsed = key_types::parse_mv_internal_key(iter.key())?;
        let period = ValidTimePeriod::new(lo, hi);
        match parsed.value_type {
            ValueType::Value => Some(MVLookupResult {
                value: Some(iter.value().to_vec()),
                period,
            }),
            ValueType::Deletion => Some(MVLookupResult {
                value: None,
                period,
            }),
        }
    }

    /// Appends every version of every key in `keys` that overlaps `[lo_t, hi_t)`,
    /// visible at `snapshot`, to `result_set`. Returns `true` if anything was added.
    pub fn get_mv_range(
        &self,
        keys: &[Vec<u8>],
        lo_t: ValidTime,
        hi_t: ValidTime,
        snapshot: SequenceNumber,
        result_set: &mut Vec<ResultVersion>,
    ) -> bool {
        let initial_len = result_set.len();

        for key in keys {
            let lookup = MVLookupKey::new(key, snapshot, hi_t);
            let mut iter = self.map.iter();
            iter.seek(lookup.memtable_key());
            if !iter.valid() {
                continue;
            }

            let first = match key_types::parse_mv_internal_key(iter.key()) {
                Some(p) => p,
                None => continue,
            };
            if self.map.comparator().user_cmp().cmp(first.user_key, key) != Ordering::Equal {
                continue;
            }

            let mut hi = self.valid_time_hi.load(AtomicOrdering::SeqCst).min(MAX_VALID_TIME);
            let mut lo = first.valid_time;

            while hi > lo_t {
                let parsed = key_types::parse_mv_internal_key(iter.key())
                    .expect("arena-owned record became unparseable");
                match parsed.value_type {
                    ValueType::Value => result_set.push(ResultVersion::new(
                        key,
                        iter.value(),
                        false,
                        ValidTimePeriod::new(lo, hi),
                    )),
                    ValueType::Deletion => result_set.push(ResultVersion::new(
                        key,
                        &[],
                        true,
                        ValidTimePeriod::new(lo, hi),
                    )),
                }

                hi = lo;
                iter.next();
                if !iter.valid() {
                    break;
                }
                let next = match key_types::parse_mv_internal_key(iter.key()) {
                    Some(p) => p,
                    None => break,
                };
                if self.map.comparator().user_cmp().cmp(next.user_key, key) != Ordering::Equal {
                    break;
                }
                lo = next.valid_time;
            }
        }

        result_set.len() > initial_len
    }

    /// An iterator over every record in internal-key order: `key()` returns the raw
    /// internal key (no outer length prefix), `value()` the record's value.
    pub fn new_iterator(&self) -> SkipMapIter<'_, C> {
        self.map.iter()
    }
}
