//! Arena-backed ordered map keyed by internal key, storing pointers to whole memtable
//! records (`varint32(ikey_len) || ikey || varint32(val_len) || val`). Supports a
//! single concurrent writer and any number of readers once a write has returned; see
//! `memtable` for the full concurrency contract.

use std::{
    cmp::Ordering,
    mem, ptr, slice,
    sync::atomic::{AtomicPtr, AtomicUsize, Ordering as AtomicOrdering},
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::arena::Arena;
use crate::cmp::Cmp;
use crate::codec::decode_varint32;
use crate::types::LdbIterator;

const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

struct Node {
    /// Pointer to an arena-owned memtable record; null only for the sentinel head.
    key: *const u8,
    next: [AtomicPtr<Node>; MAX_HEIGHT],
}

impl Node {
    fn next(&self, level: usize) -> *mut Node {
        self.next[level].load(AtomicOrdering::Acquire)
    }

    fn set_next(&self, level: usize, n: *mut Node) {
        self.next[level].store(n, AtomicOrdering::Release)
    }
}

/// Splits a raw pointer to a memtable record into `(internal_key, value)` slices.
/// Reads the two varint32 length headers speculatively (up to 5 bytes each), which is
/// sound as long as the record isn't the very last few bytes of its arena block —
/// the same assumption the reference memtable this is ported from relies on.
unsafe fn record_parts<'a>(ptr: *const u8) -> (&'a [u8], &'a [u8]) {
    let header = slice::from_raw_parts(ptr, 5);
    let (ikey_len, off) = decode_varint32(header).expect("corrupt memtable record header");
    let ikey = slice::from_raw_parts(ptr.add(off), ikey_len as usize);

    let val_off = off + ikey_len as usize;
    let header2 = slice::from_raw_parts(ptr.add(val_off), 5);
    let (val_len, off2) = decode_varint32(header2).expect("corrupt memtable record header");
    let value = slice::from_raw_parts(ptr.add(val_off + off2), val_len as usize);

    (ikey, value)
}

pub struct SkipMap<C: Cmp> {
    pub(crate) arena: Arena,
    cmp: C,
    head: *mut Node,
    max_height: AtomicUsize,
    rand: StdRng,
    len: usize,
}

impl<C: Cmp> SkipMap<C> {
    pub fn new(cmp: C) -> SkipMap<C> {
        let mut arena = Arena::new();
        let head = Self::allocate_node(&mut arena, ptr::null());
        SkipMap {
            arena,
            cmp,
            head,
            max_height: AtomicUsize::new(1),
            rand: StdRng::seed_from_u64(0xdead_beef),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes owned by the arena backing this map's nodes and records.
    pub fn approx_memory(&self) -> usize {
        self.arena.memory_usage()
    }

    fn allocate_node(arena: &mut Arena, key: *const u8) -> *mut Node {
        let p = arena.allocate_aligned(mem::size_of::<Node>()) as *mut Node;
        unsafe {
            ptr::write(
                p,
                Node {
                    key,
                    next: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
                },
            );
        }
        p
    }

    fn get_max_height(&self) -> usize {
        self.max_height.load(AtomicOrdering::Relaxed)
    }

    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.rand.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }

    fn key_cmp(&self, node: *const Node, key: &[u8]) -> Ordering {
        let node_key = unsafe { record_parts((*node).key).0 };
        self.cmp.cmp(node_key, key)
    }

    /// Returns the first node whose internal key is `>= key` (null if none), filling
    /// `prev` with the per-level predecessor when present (used by `insert_record`).
    fn find_greater_or_equal(&self, key: &[u8], mut prev: Option<&mut [*mut Node]>) -> *mut Node {
        let mut node = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if !next.is_null() && self.key_cmp(next, key) == Ordering::Less {
                node = next;
            } else {
                if let Some(ref mut prev) = prev {
                    prev[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Returns the last node whose internal key is `< key` (the head sentinel if
    /// none).
    fn find_less_than(&self, key: &[u8]) -> *mut Node {
        let mut node = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if !next.is_null() && self.key_cmp(next, key) == Ordering::Less {
                node = next;
            } else if level == 0 {
                return node;
            } else {
                level -= 1;
            }
        }
    }

    /// Returns the last node in the map (the head sentinel if empty).
    fn find_last(&self) -> *mut Node {
        let mut node = self.head;
        let mut level = self.get_max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if !next.is_null() {
                node = next;
            } else if level == 0 {
                return node;
            } else {
                level -= 1;
            }
        }
    }

    /// Inserts a pointer to a memtable record whose bytes are already arena-resident
    /// (see `Arena::allocate_from`/`key_types::build_memtable_record`). Ordering is by
    /// internal key only, via the comparator this map was constructed with.
    pub fn insert_record(&mut self, record_ptr: *const u8) {
        let ikey = unsafe { record_parts(record_ptr).0 }.to_vec();
        let mut prev: [*mut Node; MAX_HEIGHT] = [self.head; MAX_HEIGHT];
        self.find_greater_or_equal(&ikey, Some(&mut prev));

        let height = self.random_height();
        if height > self.get_max_height() {
            for slot in prev.iter_mut().take(height).skip(self.get_max_height()) {
                *slot = self.head;
            }
            self.max_height.store(height, AtomicOrdering::Relaxed);
        }

        let new_node = Self::allocate_node(&mut self.arena, record_ptr);
        for level in 0..height {
            unsafe {
                let p = prev[level];
                (*new_node).next[level].store((*p).next(level), AtomicOrdering::Relaxed);
                (*p).set_next(level, new_node);
            }
        }
        self.len += 1;
    }

    pub fn iter(&self) -> SkipMapIter<'_, C> {
        SkipMapIter {
            map: self,
            node: ptr::null(),
        }
    }

    pub fn comparator(&self) -> &C {
        &self.cmp
    }
}

// Safety: a `SkipMap`'s nodes and records are all owned by its `Arena`; moving the
// whole map to another thread is sound as long as access from the old thread has
// stopped, which matches the single-writer-at-a-time contract documented above.
unsafe impl<C: Cmp> Send for SkipMap<C> {}

// Safety: traversal only ever follows `AtomicPtr` links loaded with `Acquire` and never
// mutates a node's key/value bytes or its forward pointers in place (`insert_record`
// only ever CAS-links brand new nodes in). Sharing a `&SkipMap` across threads for reads
// is sound as long as inserts stay single-writer, the same contract the `Send` impl
// above and the memtable's module doc rely on.
unsafe impl<C: Cmp> Sync for SkipMap<C> {}

pub struct SkipMapIter<'a, C: Cmp> {
    map: &'a SkipMap<C>,
    node: *const Node,
}

impl<'a, C: Cmp> LdbIterator for SkipMapIter<'a, C> {
    fn valid(&self) -> bool {
        !self.node.is_null()
    }

    fn seek_to_first(&mut self) {
        self.node = unsafe { (*self.map.head).next(0) };
    }

    fn seek_to_last(&mut self) {
        let n = self.map.find_last();
        self.node = if n == self.map.head { ptr::null() } else { n };
    }

    fn seek(&mut self, target: &[u8]) {
        self.node = self.map.find_greater_or_equal(target, None);
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    fn prev(&mut self) {
        assert!(self.valid());
        let ikey = unsafe { record_parts((*self.node).key).0 };
        let n = self.map.find_less_than(ikey);
        self.node = if n == self.map.head { ptr::null() } else { n };
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        unsafe { record_parts((*self.node).key).0 }
    }

    fn value(&self) -> &[u8] {
        assert!(self.valid());
        unsafe { record_parts((*self.node).key).1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmp::{DefaultCmp, InternalKeyComparator};
    use crate::key_types::{build_memtable_record, LookupKey};
    use crate::types::{SequenceNumber, ValueType};
    use std::sync::Arc;

    fn make_map() -> SkipMap<InternalKeyComparator> {
        SkipMap::new(InternalKeyComparator(Arc::new(Box::new(DefaultCmp))))
    }

    fn insert(map: &mut SkipMap<InternalKeyComparator>, key: &[u8], seq: SequenceNumber, val: &[u8]) {
        let mut ikey = Vec::new();
        crate::key_types::append_internal_key(&mut ikey, key, seq, ValueType::Value);
        let record = build_memtable_record(&ikey, val);
        let ptr = map.arena.allocate_from(&record);
        map.insert_record(ptr);
    }

    #[test]
    fn test_insert_and_iterate_in_order() {
        let mut map = make_map();
        let keys: &[&[u8]] = &[b"aba", b"abc", b"abb", b"abz", b"aaa"];
        for (i, k) in keys.iter().enumerate() {
            insert(&mut map, k, i as u64 + 1, b"v");
        }
        assert_eq!(map.len(), keys.len());

        let mut iter = map.iter();
        iter.seek_to_first();
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(crate::key_types::extract_user_key(iter.key()).to_vec());
            iter.next();
        }
        let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_seek_and_prev() {
        let mut map = make_map();
        for (i, k) in [b"aba".as_slice(), b"abc", b"abd"].iter().enumerate() {
            insert(&mut map, k, i as u64 + 1, b"v");
        }

        let mut iter = map.iter();
        iter.seek(LookupKey::new(b"abb", SequenceNumber::MAX).internal_key());
        assert!(iter.valid());
        assert_eq!(crate::key_types::extract_user_key(iter.key()), b"abc");

        iter.prev();
        assert!(iter.valid());
        assert_eq!(crate::key_types::extract_user_key(iter.key()), b"aba");

        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn test_seek_to_last() {
        let mut map = make_map();
        for (i, k) in [b"aba".as_slice(), b"abc", b"abd"].iter().enumerate() {
            insert(&mut map, k, i as u64 + 1, b"v");
        }
        let mut iter = map.iter();
        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(crate::key_types::extract_user_key(iter.key()), b"abd");
    }

    #[test]
    fn test_newest_version_first_for_same_user_key() {
        let mut map = make_map();
        insert(&mut map, b"k", 1, b"old");
        insert(&mut map, b"k", 5, b"new");

        let mut iter = map.iter();
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.value(), b"new");
        iter.next();
        assert!(iter.valid());
        assert_eq!(iter.value(), b"old");
    }
}
