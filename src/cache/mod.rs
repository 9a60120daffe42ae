//! In-process memoization of engine outputs.

/// Cache keys
mod key;
/// Subject to realm mapping
mod partition_index;
/// Single-flight LRU cache
mod query_cache;

pub use key::{CacheKey, EntityKind, PageWindow};
pub use partition_index::PartitionIndex;
pub use query_cache::{
    CacheConfig, CacheEntry, CachePolicy, CacheStats, CacheValue, QueryCache,
};
