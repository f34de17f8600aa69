//! In-memory response body cache.
//!
//! [`CacheStore`] maps a request fingerprint to the raw body bytes captured on
//! a previous miss. Entries never expire and are never evicted: the store
//! grows with the number of distinct fingerprints seen and lives until the
//! process exits.
//!
//! The map is split into one or more partitions, each behind its own
//! [`RwLock`]. With a single partition (the default) every `store` excludes
//! every other operation; with more, only operations on the same partition
//! contend. Per-fingerprint behaviour is identical either way: a lookup sees
//! either the previous body or the new one, never a mix, and the last store
//! wins.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;

type Partition = RwLock<HashMap<String, Bytes>>;

/// Concurrency-safe fingerprint → body store.
///
/// Bodies are kept as [`Bytes`], so a lookup hands out a reference-counted
/// view of the stored buffer instead of copying it.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use rcproxy::cache::CacheStore;
///
/// let cache = CacheStore::new();
/// assert_eq!(cache.lookup("/get?x=1"), None);
///
/// cache.store("/get?x=1", Bytes::from_static(br#"{"x":1}"#));
/// assert_eq!(cache.lookup("/get?x=1").as_deref(), Some(&br#"{"x":1}"#[..]));
/// ```
#[derive(Debug)]
pub struct CacheStore {
    partitions: Box<[Partition]>,
    hasher: RandomState,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Creates an empty store guarded by a single read/write lock.
    pub fn new() -> Self {
        Self::with_shards(1)
    }

    /// Creates an empty store split into `shards` independently locked
    /// partitions. A count of zero is treated as one.
    pub fn with_shards(shards: usize) -> Self {
        let partitions = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            partitions,
            hasher: RandomState::new(),
        }
    }

    /// Returns the number of partitions.
    pub fn shard_count(&self) -> usize {
        self.partitions.len()
    }

    /// Returns the stored body for `fingerprint`, if any.
    ///
    /// Takes the partition's shared lock for the duration of the map lookup
    /// only; concurrent lookups never block each other.
    pub fn lookup(&self, fingerprint: &str) -> Option<Bytes> {
        self.partition(fingerprint)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fingerprint)
            .cloned()
    }

    /// Inserts or replaces the body stored for `fingerprint`.
    ///
    /// Takes the partition's exclusive lock for the duration of the insert.
    pub fn store(&self, fingerprint: impl Into<String>, body: Bytes) {
        let fingerprint = fingerprint.into();
        self.partition(&fingerprint)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint, body);
    }

    /// Returns the number of cached fingerprints.
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|partition| partition.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns `true` if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition(&self, fingerprint: &str) -> &Partition {
        if self.partitions.len() == 1 {
            return &self.partitions[0];
        }
        let hash = self.hasher.hash_one(fingerprint);
        // Truncation is fine: only the low bits pick a partition.
        &self.partitions[hash as usize % self.partitions.len()]
    }
}
