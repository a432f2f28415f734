use crate::engine_api::{ExecutionBlock, ExecutionBlockHash};
use crate::metrics;
use lru::LruCache;
use parking_lot::Mutex;

pub const DEFAULT_HEADER_CACHE_SIZE: usize = 512;

struct Inner {
    by_hash: LruCache<ExecutionBlockHash, ExecutionBlock>,
    by_number: LruCache<u64, ExecutionBlockHash>,
}

/// A bounded cache of execution block headers, addressable by block number or block hash.
///
/// Both indices sit behind one lock so that a `put` is visible through either key at once.
/// Entries evicted from the hash index are misses through the number index as well.
/// Reads take the same exclusive lock since an LRU lookup updates recency.
pub struct HeaderCache {
    inner: Mutex<Inner>,
}

impl Default for HeaderCache {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_CACHE_SIZE)
    }
}

impl HeaderCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                by_hash: LruCache::new(capacity),
                by_number: LruCache::new(capacity),
            }),
        }
    }

    pub fn put(&self, header: ExecutionBlock) {
        let mut inner = self.inner.lock();
        inner.by_number.put(header.block_number, header.block_hash);
        inner.by_hash.put(header.block_hash, header);
    }

    pub fn get_by_hash(&self, hash: &ExecutionBlockHash) -> Option<ExecutionBlock> {
        let header = self.inner.lock().by_hash.get(hash).copied();
        record(header.is_some());
        header
    }

    pub fn get_by_number(&self, number: u64) -> Option<ExecutionBlock> {
        let mut inner = self.inner.lock();
        let hash = inner.by_number.get(&number).copied();
        let header = match hash {
            Some(hash) => inner.by_hash.get(&hash).copied(),
            None => None,
        };
        drop(inner);
        record(header.is_some());
        header
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn record(hit: bool) {
    let event = if hit { metrics::HIT } else { metrics::MISS };
    metrics::inc_counter_vec(&metrics::ENGINE_HEADER_CACHE, &[event]);
}
