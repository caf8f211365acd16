//! Fingerprint-keyed result cache.
//!
//! Stage results are stored under a [`Fingerprint`] of the inputs that
//! actually influence them. Entries expire by TTL and, with a configured
//! entry limit, the least recently used entry is evicted first.

mod fingerprint;
mod store;

pub use fingerprint::{canonical_json, Fingerprint};
pub use store::{CacheConfig, CacheStats, ResultCache};
