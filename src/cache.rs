use std::collections::HashMap;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::model::MediaReference;

pub type MediaBuffer = Arc<[u8]>;

pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

struct IdentityEntry {
    reference: Weak<MediaReference>,
    buffer: MediaBuffer,
}

impl IdentityEntry {
    fn is_live(&self) -> bool {
        self.reference.strong_count() > 0
    }
}

struct DurableTier {
    entries: LruCache<String, MediaBuffer>,
    total_bytes: usize,
    max_bytes: usize,
}

impl DurableTier {
    fn get(&mut self, url: &str) -> Option<MediaBuffer> {
        self.entries.get(url).cloned()
    }

    fn insert(&mut self, url: &str, buffer: MediaBuffer) -> bool {
        let cost = buffer.len();
        if cost > self.max_bytes {
            debug!(url, cost, max = self.max_bytes, "media too large for durable cache");
            return false;
        }
        if let Some(previous) = self.entries.pop(url) {
            self.total_bytes -= previous.len();
        }

        let mut evicted = 0usize;
        while self.total_bytes + cost > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, oldest)) => {
                    self.total_bytes -= oldest.len();
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(evicted, total = self.total_bytes, "evicted media from durable cache");
        }

        self.entries.push(url.to_string(), buffer);
        self.total_bytes += cost;
        true
    }
}

/// Two-tier cache for downloaded media.
///
/// The identity tier is keyed by the `Arc<MediaReference>` allocation and only
/// answers while that allocation is alive; it holds a `Weak`, so the address
/// cannot be reused by another reference while an entry exists. The durable
/// tier is keyed by url, bounded by total byte cost and evicts least recently
/// used entries first.
///
/// Constructed explicitly and shared by reference; each tier sits behind its
/// own lock so media workers and the event loop can use it concurrently.
pub struct MediaCache {
    identity: Mutex<HashMap<usize, IdentityEntry>>,
    durable: Mutex<DurableTier>,
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl MediaCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            identity: Mutex::new(HashMap::new()),
            durable: Mutex::new(DurableTier {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                max_bytes,
            }),
        }
    }

    pub fn read(&self, reference: &Arc<MediaReference>) -> Option<MediaBuffer> {
        if let Some(buffer) = self.read_identity(reference) {
            return Some(buffer);
        }
        self.durable.lock().get(&reference.url)
    }

    pub fn write(&self, reference: &Arc<MediaReference>, buffer: MediaBuffer) {
        {
            let mut identity = self.identity.lock();
            identity.retain(|_, entry| entry.is_live());
            identity.insert(
                identity_key(reference),
                IdentityEntry {
                    reference: Arc::downgrade(reference),
                    buffer: buffer.clone(),
                },
            );
        }
        self.durable.lock().insert(&reference.url, buffer);
    }

    /// Forgets the identity entry for `reference`, e.g. when the element that
    /// owns it unmounts. The durable entry is kept.
    pub fn release(&self, reference: &Arc<MediaReference>) {
        let mut identity = self.identity.lock();
        identity.remove(&identity_key(reference));
        identity.retain(|_, entry| entry.is_live());
    }

    pub fn max_bytes(&self) -> usize {
        self.durable.lock().max_bytes
    }

    pub fn durable_bytes(&self) -> usize {
        self.durable.lock().total_bytes
    }

    pub fn durable_len(&self) -> usize {
        self.durable.lock().entries.len()
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.durable.lock().entries.contains(url)
    }

    /// Live identity entries.
    pub fn identity_len(&self) -> usize {
        let mut identity = self.identity.lock();
        identity.retain(|_, entry| entry.is_live());
        identity.len()
    }

    fn read_identity(&self, reference: &Arc<MediaReference>) -> Option<MediaBuffer> {
        let mut identity = self.identity.lock();
        identity.retain(|_, entry| entry.is_live());
        identity
            .get(&identity_key(reference))
            .map(|entry| entry.buffer.clone())
    }
}

fn identity_key(reference: &Arc<MediaReference>) -> usize {
    Arc::as_ptr(reference) as usize
}
