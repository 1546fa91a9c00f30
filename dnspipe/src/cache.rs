//! TTL-aware response cache.
//!
//! Entries live in an LRU keyed by (lowercased qname, qclass, qtype,
//! optional ECS subnet). The minimum TTL among non-OPT records decides the
//! expiry; lookups age every TTL by the entry's age and treat underflow as
//! a miss. A garbage-collection task sweeps expired entries independently
//! of access, and a prefetch hook refreshes soon-to-expire entries that
//! were stored with a healthy TTL.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use lru::LruCache;

use crate::error::Result;
use crate::message::{self, ShuffleMode};
use crate::metrics::{Counter, Gauge, Registry};
use crate::modifier::ecs;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Upper bound for cached SERVFAIL responses.
const SERVFAIL_TTL_CAP: u32 = 300;

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Maximum number of entries; 0 means unbounded.
    pub capacity: usize,
    /// Period of the expired-entry sweep.
    pub gc_period: Duration,
    /// TTL applied to cacheable responses carrying no records.
    pub negative_ttl: u32,
    /// Serve-time reordering of address answers.
    pub shuffle: ShuffleMode,
    /// Remaining-TTL threshold that triggers an upstream refresh on a hit.
    pub prefetch_trigger: Option<u32>,
    /// Minimum original TTL for an entry to qualify for prefetch.
    pub prefetch_eligible: u32,
    /// Reserved query name that flushes the cache when received.
    pub flush_query: Option<String>,
    /// Synthesize NXDOMAIN when a strict ancestor has a cached NXDOMAIN
    /// (RFC 8020).
    pub harden_below_nxdomain: bool,
    /// Include the client subnet option in the cache key.
    pub ecs_aware: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            capacity: 4096,
            gc_period: Duration::from_secs(60),
            negative_ttl: 60,
            shuffle: ShuffleMode::None,
            prefetch_trigger: None,
            prefetch_eligible: 0,
            flush_query: None,
            harden_below_nxdomain: false,
            ecs_aware: false,
        }
    }
}

/// Cache lookup key. The name is lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    qname: String,
    qclass: DNSClass,
    qtype: RecordType,
    subnet: Option<(std::net::IpAddr, u8)>,
}

impl CacheKey {
    pub fn from_query(query: &Message, ecs_aware: bool) -> Option<CacheKey> {
        let q = message::first_question(query)?;
        let subnet = if ecs_aware {
            ecs::subnet_from_message(query).map(|s| (s.address, s.source_prefix))
        } else {
            None
        };
        Some(CacheKey {
            qname: q.name().to_lowercase().to_string(),
            qclass: q.query_class(),
            qtype: q.query_type(),
            subnet,
        })
    }

    fn ancestor(&self, name: &Name) -> CacheKey {
        CacheKey {
            qname: name.to_lowercase().to_string(),
            qclass: self.qclass,
            qtype: self.qtype,
            subnet: self.subnet,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    response: Message,
    stored_at: Instant,
    expires_at: Instant,
    prefetch_eligible: bool,
    prefetching: bool,
}

/// In-process LRU store. The mutex is held only for map manipulation,
/// never across downstream calls.
pub struct LruStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl LruStore {
    fn new(capacity: usize) -> Self {
        let entries = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        LruStore {
            entries: Mutex::new(entries),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.lock().expect("cache poisoned").get(key).cloned()
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.entries.lock().expect("cache poisoned").put(key, entry);
    }

    fn remove(&self, key: &CacheKey) {
        self.entries.lock().expect("cache poisoned").pop(key);
    }

    fn flush(&self) {
        self.entries.lock().expect("cache poisoned").clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("cache poisoned").len()
    }

    /// Mark an entry as being refreshed so concurrent hits do not all spawn
    /// prefetch queries. Returns false when another hit got there first.
    fn claim_prefetch(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock().expect("cache poisoned");
        match entries.peek_mut(key) {
            Some(entry) if !entry.prefetching => {
                entry.prefetching = true;
                true
            }
            _ => false,
        }
    }

    fn release_prefetch(&self, key: &CacheKey) {
        let mut entries = self.entries.lock().expect("cache poisoned");
        if let Some(entry) = entries.peek_mut(key) {
            entry.prefetching = false;
        }
    }

    /// Drop every entry past its expiry. Returns the number evicted.
    fn expire(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache poisoned");
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    #[cfg(test)]
    fn backdate(&self, key: &CacheKey, by: Duration) {
        let mut entries = self.entries.lock().expect("cache poisoned");
        if let Some(entry) = entries.peek_mut(key) {
            entry.stored_at -= by;
            entry.expires_at -= by;
        }
    }
}

/// Caching middleware.
pub struct Cache {
    id: String,
    resolver: SharedResolver,
    opts: CacheOptions,
    store: Arc<LruStore>,
    flush_name: Option<Name>,
    hits: Arc<Counter>,
    misses: Arc<Counter>,
    entries: Arc<Gauge>,
}

impl Cache {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, opts: CacheOptions) -> Result<Arc<Self>> {
        let id = id.into();
        let flush_name = match &opts.flush_query {
            Some(name) => Some(
                name.parse::<Name>()
                    .map_err(|e| crate::ResolveError::config(format!("flush query name: {}", e)))?,
            ),
            None => None,
        };
        let store = Arc::new(LruStore::new(opts.capacity));
        let cache = Arc::new(Cache {
            hits: Registry::global().counter(&format!("cache.{}.hit", id)),
            misses: Registry::global().counter(&format!("cache.{}.miss", id)),
            entries: Registry::global().gauge(&format!("cache.{}.entries", id)),
            id,
            resolver,
            flush_name,
            store: Arc::clone(&store),
            opts,
        });
        cache.spawn_gc();
        Ok(cache)
    }

    fn spawn_gc(&self) {
        let store = Arc::downgrade(&self.store);
        let entries = Arc::clone(&self.entries);
        let period = self.opts.gc_period;
        let id = self.id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    return;
                };
                let evicted = store.expire();
                entries.set(store.len() as i64);
                if evicted > 0 {
                    log::debug!("cache {}: expired {} entries", id, evicted);
                }
            }
        });
    }

    /// Build the served response from a stored entry: fresh id, aged TTLs,
    /// optional shuffle. `None` means the entry is no longer usable.
    fn response_from_entry(&self, query: &Message, entry: &CacheEntry) -> Option<Message> {
        let age = entry.stored_at.elapsed().as_secs() as u32;
        let mut response = entry.response.clone();
        response.set_id(query.id());
        if message::age_ttls(&mut response, age).is_err() {
            return None;
        }
        message::shuffle_answers(&mut response, self.opts.shuffle);
        Some(response)
    }

    /// RFC 8020: a cached NXDOMAIN at a strict ancestor proves the subtree
    /// empty.
    fn ancestor_nxdomain(&self, key: &CacheKey, qname: &Name) -> bool {
        let now = Instant::now();
        let mut ancestor = qname.base_name();
        while ancestor.num_labels() > 0 {
            if let Some(entry) = self.store.get(&key.ancestor(&ancestor)) {
                if entry.expires_at > now && entry.response.response_code() == ResponseCode::NXDomain {
                    return true;
                }
            }
            ancestor = ancestor.base_name();
        }
        false
    }

    /// Decide cacheability and expiry per the response code rules.
    fn expiry_for(&self, response: &Message) -> Option<u32> {
        if response.truncated() {
            return None;
        }
        match response.response_code() {
            ResponseCode::NoError
            | ResponseCode::NXDomain
            | ResponseCode::Refused
            | ResponseCode::NotImp
            | ResponseCode::FormErr => {
                Some(message::min_ttl(response).unwrap_or(self.opts.negative_ttl))
            }
            ResponseCode::ServFail => Some(self.opts.negative_ttl.min(SERVFAIL_TTL_CAP)),
            _ => None,
        }
    }

    fn store_response(&self, key: CacheKey, response: &Message) {
        let Some(ttl) = self.expiry_for(response) else {
            return;
        };
        let now = Instant::now();
        let entry = CacheEntry {
            response: response.clone(),
            stored_at: now,
            expires_at: now + Duration::from_secs(ttl as u64),
            prefetch_eligible: message::min_ttl(response)
                .map(|t| t > self.opts.prefetch_eligible)
                .unwrap_or(false),
            prefetching: false,
        };
        self.store.put(key, entry);
        self.entries.set(self.store.len() as i64);
    }

    /// Refresh an entry that is close to expiry. The replacement only
    /// happens when the fresh response would outlive what is stored.
    fn maybe_prefetch(&self, query: &Message, client: &ClientInfo, key: &CacheKey, entry: &CacheEntry) {
        let Some(trigger) = self.opts.prefetch_trigger else {
            return;
        };
        if !entry.prefetch_eligible {
            return;
        }
        let remaining = entry.expires_at.saturating_duration_since(Instant::now()).as_secs() as u32;
        if remaining >= trigger || !self.store.claim_prefetch(key) {
            return;
        }
        let resolver = Arc::clone(&self.resolver);
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let query = query.clone();
        let client = client.clone();
        let negative_ttl = self.opts.negative_ttl;
        let prefetch_eligible = self.opts.prefetch_eligible;
        let id = self.id.clone();
        tokio::spawn(async move {
            let refreshed = resolver.resolve(&query, &client).await;
            match refreshed {
                Ok(Some(response)) if !response.truncated() => {
                    let new_ttl = message::min_ttl(&response).unwrap_or(negative_ttl);
                    if new_ttl > remaining {
                        let now = Instant::now();
                        store.put(
                            key,
                            CacheEntry {
                                prefetch_eligible: message::min_ttl(&response)
                                    .map(|t| t > prefetch_eligible)
                                    .unwrap_or(false),
                                response,
                                stored_at: now,
                                expires_at: now + Duration::from_secs(new_ttl as u64),
                                prefetching: false,
                            },
                        );
                        return;
                    }
                    store.release_prefetch(&key);
                }
                Ok(_) => store.release_prefetch(&key),
                Err(err) => {
                    log::debug!("cache {}: prefetch failed: {}", id, err);
                    store.release_prefetch(&key);
                }
            }
        });
    }
}

#[async_trait]
impl Resolver for Cache {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        // Only single-question queries are inspected; everything else goes
        // straight through.
        if query.queries().len() != 1 {
            return self.resolver.resolve(query, client).await;
        }
        let qname = query.queries()[0].name().clone();

        if let Some(flush) = &self.flush_name {
            if &qname.to_lowercase() == flush {
                self.store.flush();
                self.entries.set(0);
                log::info!("cache {}: flushed by magic query", self.id);
                return Ok(Some(message::synthesize(query, ResponseCode::NoError)));
            }
        }

        let key = CacheKey::from_query(query, self.opts.ecs_aware).expect("single question checked");

        if let Some(entry) = self.store.get(&key) {
            if entry.expires_at > Instant::now() {
                if let Some(response) = self.response_from_entry(query, &entry) {
                    self.hits.inc();
                    self.maybe_prefetch(query, client, &key, &entry);
                    return Ok(Some(response));
                }
            }
            self.store.remove(&key);
            self.entries.set(self.store.len() as i64);
        }
        self.misses.inc();

        if self.opts.harden_below_nxdomain && self.ancestor_nxdomain(&key, &qname) {
            return Ok(Some(message::nxdomain(query)));
        }

        match self.resolver.resolve(query, client).await? {
            Some(response) => {
                self.store_response(key, &response);
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }
}
