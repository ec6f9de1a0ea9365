//! Configuration for a memtable. Trimmed down from the wider store's `Options` to just
//! what this crate's scope (the memtable itself) actually consults; disk-layer
//! concerns like block size, filter policies, and file reuse live one layer up.

use crate::cmp::{Cmp, DefaultCmp, InternalKeyComparator, MVInternalKeyComparator};
use crate::types::SequenceNumber;
use std::sync::Arc;

/// Options governing a memtable instance.
pub struct Options<C: Cmp> {
    pub cmp: C,
    /// Soft byte budget used by callers to decide when to roll the memtable over;
    /// this crate itself doesn't enforce it.
    pub write_buffer_size: usize,
    /// When set, keys carry a `valid_time` component and `add_mv`/`get_mv`/
    /// `get_mv_range` are the intended API; when unset, plain `add`/`get` are.
    pub multi_version: bool,
}

impl Default for Options<InternalKeyComparator> {
    fn default() -> Self {
        Options {
            cmp: InternalKeyComparator(Arc::new(Box::new(DefaultCmp))),
            write_buffer_size: 4 << 20,
            multi_version: false,
        }
    }
}

impl Default for Options<MVInternalKeyComparator> {
    fn default() -> Self {
        Options {
            cmp: MVInternalKeyComparator(Arc::new(Box::new(DefaultCmp))),
            write_buffer_size: 4 << 20,
            multi_version: true,
        }
    }
}

/// Supplied to read operations.
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Bounds visibility to records with `sequence <= snapshot`; `None` reads as of
    /// the most recent write.
    pub snapshot: Option<SequenceNumber>,
}

/// Supplied to write operations. Currently just a placeholder: nothing in this crate
/// varies its behavior on it yet, but `add`/`add_mv`'s callers are expected to take one,
/// matching the shape the rest of the stack's write path uses.
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let o = Options::<InternalKeyComparator>::default();
        assert!(!o.multi_version);
        assert_eq!(o.write_buffer_size, 4 << 20);

        let o = Options::<MVInternalKeyComparator>::default();
        assert!(o.multi_version);
    }

    #[test]
    fn test_read_options_default_has_no_snapshot() {
        assert_eq!(ReadOptions::default().snapshot, None);
    }
}
