//! # In-memory file caching
//!
//! Files served by sluice are kept in a small in-memory cache, the [`RecencyCache`]. It holds
//! a fixed number of [`CacheEntry`]s and evicts the least recently used one when full.
//!
//! An entry is only valid for the modification time it was read with. The
//! [`FileRequester`](crate::requester::FileRequester) compares the stored
//! [`CacheEntry::modified`] with the one observed by the caller and treats any difference as a
//! miss. There is no time-to-live, a file that never changes stays cached until it is evicted.
//!
//! The cache is not persisted anywhere, a restart starts out empty.

use std::time::SystemTime;

use bytes::Bytes;

mod error;
mod recency;

pub use error::ConfigError;
pub use recency::RecencyCache;

/// The contents of a file together with the modification time they were read for.
///
/// Entries are never mutated, a fresh read replaces the whole entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub content: Bytes,
    pub modified: SystemTime,
}

impl CacheEntry {
    /// Returns the content if this entry was read for exactly `modified`.
    pub fn content_for(&self, modified: SystemTime) -> Option<&Bytes> {
        (self.modified == modified).then_some(&self.content)
    }
}
