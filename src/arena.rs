//! Block-based bump allocator backing memtable records and skiplist nodes. Never
//! frees individual allocations; the whole arena (and everything carved out of it) is
//! reclaimed together when the owning `MemTable` is dropped.

use std::{mem, ptr};

use log::trace;

const BLOCK_SIZE: usize = 4096;

pub struct Arena {
    alloc_ptr: *mut u8,
    alloc_bytes_remaining: usize,
    blocks: Vec<Vec<u8>>,
    memory_usage: usize,
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            alloc_ptr: ptr::null_mut(),
            alloc_bytes_remaining: 0,
            blocks: Vec::new(),
            memory_usage: 0,
        }
    }

    /// Allocates `bytes` uninitialized bytes, returning a pointer valid for the
    /// lifetime of the arena. Panics if `bytes` is 0.
    pub fn allocate(&mut self, bytes: usize) -> *mut u8 {
        assert!(bytes > 0);
        if bytes <= self.alloc_bytes_remaining {
            let result = self.alloc_ptr;
            self.alloc_ptr = unsafe { self.alloc_ptr.add(bytes) };
            self.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(bytes)
    }

    /// Allocates `bytes`, aligned to `max(align_of::<usize>(), 8)`. The skiplist uses
    /// this for its node headers so that the `AtomicPtr` fields inside them never
    /// straddle a cache line in a way that breaks atomicity on some platforms.
    pub fn allocate_aligned(&mut self, bytes: usize) -> *mut u8 {
        let align = mem::size_of::<usize>().max(8);
        let current_mod = self.alloc_ptr as usize & (align - 1);
        let slop = if current_mod == 0 { 0 } else { align - current_mod };
        if slop + bytes <= self.alloc_bytes_remaining {
            let result = unsafe { self.alloc_ptr.add(slop) };
            self.alloc_ptr = unsafe { self.alloc_ptr.add(slop + bytes) };
            self.alloc_bytes_remaining -= slop + bytes;
            return result;
        }
        let result = self.allocate_fallback(bytes);
        assert_eq!(result as usize & (align - 1), 0);
        result
    }

    /// Copies `data` into freshly allocated arena space and returns a pointer to the
    /// copy. Used for memtable records, which are built up in a scratch `Vec<u8>` and
    /// then handed to the arena once their final length is known.
    pub fn allocate_from(&mut self, data: &[u8]) -> *const u8 {
        if data.is_empty() {
            return ptr::null();
        }
        let dst = self.allocate(data.len());
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        dst
    }

    /// Approximate total bytes owned by this arena's blocks (not accounting for
    /// unused slop at the tail of the current block).
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    fn allocate_fallback(&mut self, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // Large allocations get their own block so they don't waste the
            // remainder of a shared one.
            return self.allocate_new_block(bytes);
        }

        self.alloc_ptr = self.allocate_new_block(BLOCK_SIZE);
        self.alloc_bytes_remaining = BLOCK_SIZE;
        let result = self.alloc_ptr;
        self.alloc_ptr = unsafe { self.alloc_ptr.add(bytes) };
        self.alloc_bytes_remaining -= bytes;
        result
    }

    fn allocate_new_block(&mut self, block_bytes: usize) -> *mut u8 {
        trace!(
            "arena growing by a new {}-byte block ({} total so far)",
            block_bytes,
            self.memory_usage + block_bytes
        );
        self.blocks.push(vec![0u8; block_bytes]);
        self.memory_usage += block_bytes;
        self.blocks.last_mut().unwrap().as_mut_ptr()
    }
}

impl Default for Arena {
    fn default() -> Arena {
        Arena::new()
    }
}

// Safety: an `Arena`'s blocks are heap-allocated `Vec<u8>`s owned exclusively by it;
// handing out raw pointers into them is sound as long as callers don't outlive the
// arena, which is the same contract the skiplist and memtable already rely on for
// their raw node/record pointers.
unsafe impl Send for Arena {}

// Safety: once allocated, a block's bytes are only ever written through the pointer
// returned to the original caller, under the single-writer discipline the memtable
// documents; concurrent `&self` access from other threads only reads bytes through
// pointers already handed out, which never races with `allocate`/`allocate_aligned`/
// `allocate_from`'s own bookkeeping (`alloc_ptr`, `alloc_bytes_remaining`, `blocks`,
// `memory_usage`), all of which require `&mut self` to touch.
unsafe impl Sync for Arena {}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_arena_empty() {
        let _arena = Arena::new();
    }

    #[test]
    fn test_arena_simple() {
        let mut allocated: Vec<(usize, *const u8)> = Vec::new();
        let mut arena = Arena::new();
        const N: usize = 10_000;
        let mut bytes = 0usize;
        let mut rng = StdRng::seed_from_u64(301);
        for i in 0..N {
            let mut s = if i % (N / 10) == 0 {
                i
            } else if rng.gen_range(0..4000) == 0 {
                rng.gen_range(0..6000)
            } else if rng.gen_range(0..10) == 0 {
                rng.gen_range(0..100)
            } else {
                rng.gen_range(0..20)
            };
            if s == 0 {
                s = 1;
            }
            let r = if rng.gen_range(0..10) == 0 {
                arena.allocate_aligned(s)
            } else {
                arena.allocate(s)
            };
            for b in 0..s {
                unsafe { *r.add(b) = i as u8 };
            }
            bytes += s;
            allocated.push((s, r));
            assert!(arena.memory_usage() >= bytes);
        }
        for (i, &(num_bytes, p)) in allocated.iter().enumerate() {
            for b in 0..num_bytes {
                assert_eq!(unsafe { *p.add(b) }, i as u8);
            }
        }
    }

    #[test]
    fn test_arena_allocate_from() {
        let mut arena = Arena::new();
        let p1 = arena.allocate_from(b"hello");
        let p2 = arena.allocate_from(b"world!");
        unsafe {
            assert_eq!(std::slice::from_raw_parts(p1, 5), b"hello");
            assert_eq!(std::slice::from_raw_parts(p2, 6), b"world!");
        }
    }
}
