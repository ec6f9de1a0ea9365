#![allow(dead_code)]

mod arena;
mod cmp;
mod codec;
mod error;
mod key_types;
mod memtable;
mod options;
mod skipmap;
mod types;
mod write_batch;

pub use cmp::{Cmp, DefaultCmp, InternalCmp, InternalKeyComparator, MVInternalKeyComparator};
pub use error::{Result, Status, StatusCode};
pub use key_types::{
    append_internal_key, append_mv_internal_key, parse_internal_key, parse_mv_internal_key,
    LookupKey, MVLookupKey, ParsedInternalKey, ParsedMVInternalKey, UserKey,
};
pub use memtable::{LookupResult, MVLookupResult, MemTable};
pub use options::{Options, ReadOptions, WriteOptions};
pub use skipmap::SkipMapIter;
pub use types::{
    LdbIterator, ResultVersion, SequenceNumber, ValidTime, ValidTimePeriod, ValueType,
    MAX_SEQUENCE_NUMBER, MAX_VALID_TIME,
};
pub use write_batch::{insert_into, WriteBatchMV};
