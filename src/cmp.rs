use std::{cmp::Ordering, sync::Arc};

use crate::{
    key_types::{self, LookupKey, MVLookupKey},
    types::{self, VALUE_TYPE_FOR_SEEK},
};

/// Comparator trait, supporting types that can be nested (i.e., add additional
/// functionality on top of an inner comparator).
pub trait Cmp {
    /// Compares two byte strings, bytewise.
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering;
    /// Returns the shortest byte string that compares "Greater" to the first argument
    /// and "Less" to the second one.
    fn find_shortest_sep(&self, a: &[u8], b: &[u8]) -> Vec<u8>;
    /// Returns the shortest byte string that compares "Greater" to the argument.
    fn find_short_succ(&self, a: &[u8]) -> Vec<u8>;
    /// A unique identifier for a comparator. A comparator wrapper (like
    /// `InternalKeyComparator`) may return the id of its inner comparator.
    fn id(&self) -> &'static str;
}

/// Lexical comparator.
#[derive(Clone)]
pub struct DefaultCmp;

impl Cmp for DefaultCmp {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn id(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn find_shortest_sep(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        if a == b {
            return a.to_vec();
        }

        let min = if a.len() < b.len() { a.len() } else { b.len() };
        let mut diff_at = 0;

        while diff_at < min && a[diff_at] == b[diff_at] {
            diff_at += 1;
        }

        while diff_at < min {
            let diff = a[diff_at];
            if diff < 0xff && diff + 1 < b[diff_at] {
                let mut sep = Vec::from(&a[0..diff_at + 1]);
                sep[diff_at] += 1;
                assert!(self.cmp(&sep, b) == Ordering::Less);
                return sep;
            }

            diff_at += 1;
        }

        // Backup case: either `a` is full of 0xff, or all differing places are less
        // than 2 apart. The result is not necessarily short, but a valid separator.
        let mut sep = a.to_vec();
        sep[a.len() - 1] += 1;
        sep
    }

    fn find_short_succ(&self, a: &[u8]) -> Vec<u8> {
        let mut result = a.to_vec();
        for i in 0..a.len() {
            if a[i] != 0xff {
                result[i] += 1;
                result.truncate(i + 1);
                return result;
            }
        }
        // Rare path: `a` is all 0xff.
        result.push(0xff);
        result
    }
}

/// An internal-key comparator additionally exposes the user comparator it wraps, so
/// callers (the memtable's `Get`/`GetMV` family) can compare just the user-key
/// portion of two keys without re-deriving it from the wrapper's `cmp`.
pub trait InternalCmp: Cmp {
    fn user_cmp(&self) -> &dyn Cmp;
}

fn internal_key_min_for(user_key: &[u8], seq: types::SequenceNumber) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + 8);
    key_types::append_internal_key(&mut out, user_key, seq, VALUE_TYPE_FOR_SEEK);
    out
}

/// Wraps a user-supplied comparator to compare single-version internal keys: order by
/// increasing user key, then by decreasing sequence number (so that, for a fixed user
/// key, the newest version sorts first).
#[derive(Clone)]
pub struct InternalKeyComparator(pub Arc<Box<dyn Cmp + Send + Sync>>);

impl InternalKeyComparator {
    /// Compares two byte strings using the wrapped user comparator directly, bypassing
    /// the internal-key tag.
    fn cmp_inner(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.0.cmp(a, b)
    }
}

impl Cmp for InternalKeyComparator {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        let pa = key_types::parse_internal_key(a).expect("corrupt internal key");
        let pb = key_types::parse_internal_key(b).expect("corrupt internal key");

        match self.0.cmp(pa.user_key, pb.user_key) {
            Ordering::Equal => pb.sequence.cmp(&pa.sequence),
            o => o,
        }
    }

    fn id(&self) -> &'static str {
        self.0.id()
    }

    fn find_shortest_sep(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let ua = key_types::extract_user_key(a);
        let ub = key_types::extract_user_key(b);
        let sep = self.0.find_shortest_sep(ua, ub);

        if sep.len() < ua.len() && self.0.cmp(ua, &sep) == Ordering::Less {
            // The user key got physically shorter but logically larger: tack on the
            // tag that sorts first among all versions of that (nonexistent) key, so
            // the result still lands strictly between `a` and `b`.
            let candidate = internal_key_min_for(&sep, types::MAX_SEQUENCE_NUMBER);
            debug_assert_eq!(self.cmp(a, &candidate), Ordering::Less);
            debug_assert_eq!(self.cmp(&candidate, b), Ordering::Less);
            candidate
        } else {
            a.to_vec()
        }
    }

    fn find_short_succ(&self, a: &[u8]) -> Vec<u8> {
        let ua = key_types::extract_user_key(a);
        let succ = self.0.find_short_succ(ua);

        if succ.len() < ua.len() && self.0.cmp(ua, &succ) == Ordering::Less {
            let candidate = internal_key_min_for(&succ, types::MAX_SEQUENCE_NUMBER);
            debug_assert_eq!(self.cmp(a, &candidate), Ordering::Less);
            candidate
        } else {
            a.to_vec()
        }
    }
}

impl InternalCmp for InternalKeyComparator {
    fn user_cmp(&self) -> &dyn Cmp {
        self.0.as_ref().as_ref()
    }
}

fn mv_internal_key_min_for(
    user_key: &[u8],
    seq: types::SequenceNumber,
    valid_time: types::ValidTime,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + 16);
    key_types::append_mv_internal_key(&mut out, user_key, seq, VALUE_TYPE_FOR_SEEK, valid_time);
    out
}

/// Wraps a user-supplied comparator to compare multi-version internal keys: order by
/// increasing user key, then by decreasing valid_time, then by decreasing sequence
/// number. For a fixed user key this places the newest valid_time first, and among
/// equal valid_times the newest write first.
#[derive(Clone)]
pub struct MVInternalKeyComparator(pub Arc<Box<dyn Cmp + Send + Sync>>);

impl Cmp for MVInternalKeyComparator {
    fn cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        let pa = key_types::parse_mv_internal_key(a).expect("corrupt mv internal key");
        let pb = key_types::parse_mv_internal_key(b).expect("corrupt mv internal key");

        match self.0.cmp(pa.user_key, pb.user_key) {
            Ordering::Equal => match pb.valid_time.cmp(&pa.valid_time) {
                Ordering::Equal => pb.sequence.cmp(&pa.sequence),
                o => o,
            },
            o => o,
        }
    }

    fn id(&self) -> &'static str {
        self.0.id()
    }

    fn find_shortest_sep(&self, a: &[u8], b: &[u8]) -> Vec<u8> {
        let ua = key_types::extract_mv_user_key(a);
        let ub = key_types::extract_mv_user_key(b);
        let sep = self.0.find_shortest_sep(ua, ub);

        if sep.len() < ua.len() && self.0.cmp(ua, &sep) == Ordering::Less {
            let candidate =
                mv_internal_key_min_for(&sep, types::MAX_SEQUENCE_NUMBER, types::MAX_VALID_TIME);
            debug_assert_eq!(self.cmp(a, &candidate), Ordering::Less);
            debug_assert_eq!(self.cmp(&candidate, b), Ordering::Less);
            candidate
        } else {
            a.to_vec()
        }
    }

    fn find_short_succ(&self, a: &[u8]) -> Vec<u8> {
        let ua = key_types::extract_mv_user_key(a);
        let succ = self.0.find_short_succ(ua);

        if succ.len() < ua.len() && self.0.cmp(ua, &succ) == Ordering::Less {
            let candidate = mv_internal_key_min_for(
                &succ,
                types::MAX_SEQUENCE_NUMBER,
                types::MAX_VALID_TIME,
            );
            debug_assert_eq!(self.cmp(a, &candidate), Ordering::Less);
            candidate
        } else {
            a.to_vec()
        }
    }
}

impl InternalCmp for MVInternalKeyComparator {
    fn user_cmp(&self) -> &dyn Cmp {
        self.0.as_ref().as_ref()
    }
}
