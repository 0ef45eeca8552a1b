//! Cache module for storing API responses
//!
//! The store keeps recently used entries in memory and mirrors every entry to
//! a JSON file on disk, so cached responses survive restarts. Entries older
//! than the configured TTL are treated as misses and deleted. Caching is
//! best-effort: no operation here returns an error.

mod store;

pub use store::{fingerprint, CacheStats, CacheStore, DEFAULT_TTL};
