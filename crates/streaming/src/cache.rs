use std::collections::BTreeMap;

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use runtime::metrics::{CacheEvent, CacheMetrics};

use crate::fetch::FetchError;
use crate::key::ResourceKey;

/// A fetch that any number of requesters can await; all of them observe the
/// same result.
pub type SharedFetch<T, E = FetchError> = Shared<LocalBoxFuture<'static, Result<T, E>>>;

/// Lifecycle of one cache entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Ready,
    Failed,
}

/// Singleflight cache from normalized resource keys to shared fetch futures.
///
/// Invariants:
/// - At most one fetch per key is outstanding; later requesters join it.
/// - A completed failure is kept (so current awaiters all see it) but is replaced
///   by the next explicit request for the same key.
/// - There is at most one root entry. [`ResourceKey::Root`] is an alias for the
///   path registered through [`ResourceCache::set_root`], or a direct entry when
///   the root document has no path of its own.
pub struct ResourceCache<T, E = FetchError>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    root: Option<ResourceKey>,
    entries: BTreeMap<ResourceKey, SharedFetch<T, E>>,
    metrics: CacheMetrics,
}

impl<T, E> ResourceCache<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            root: None,
            entries: BTreeMap::new(),
            metrics: CacheMetrics::new(),
        }
    }

    fn resolve<'a>(&'a self, key: &'a ResourceKey) -> &'a ResourceKey {
        match (key, &self.root) {
            (ResourceKey::Root, Some(alias)) => alias,
            _ => key,
        }
    }

    /// Marks `key` as the root document. Only the first call wins.
    pub fn set_root(&mut self, key: ResourceKey) -> bool {
        if self.root.is_some() || key.is_root() {
            return false;
        }
        self.root = Some(key);
        true
    }

    pub fn root_key(&self) -> Option<&ResourceKey> {
        self.root.as_ref()
    }

    /// Synchronous fast path: the value of a completed, successful fetch.
    pub fn retrieve(&self, key: &ResourceKey) -> Option<T> {
        let shared = self.entries.get(self.resolve(key))?;
        match shared.peek() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// The shared future for `key` in whatever state it is in.
    pub fn pending(&self, key: &ResourceKey) -> Option<SharedFetch<T, E>> {
        self.entries.get(self.resolve(key)).cloned()
    }

    pub fn state(&self, key: &ResourceKey) -> Option<FetchState> {
        let shared = self.entries.get(self.resolve(key))?;
        Some(match shared.peek() {
            None => FetchState::Pending,
            Some(Ok(_)) => FetchState::Ready,
            Some(Err(_)) => FetchState::Failed,
        })
    }

    /// Registers an in-flight or completed fetch. If a usable entry already
    /// exists, `fetch` is dropped unpolled and the existing entry is returned.
    pub fn add(&mut self, key: ResourceKey, fetch: LocalBoxFuture<'static, Result<T, E>>) -> SharedFetch<T, E> {
        self.get_or_fetch(key, move || fetch)
    }

    /// Returns the existing entry for `key`, or starts a new fetch with `make`.
    ///
    /// `make` runs only when nothing usable is cached, so the underlying
    /// operation is issued once no matter how many requesters arrive while it
    /// is pending.
    pub fn get_or_fetch<F>(&mut self, key: ResourceKey, make: F) -> SharedFetch<T, E>
    where
        F: FnOnce() -> LocalBoxFuture<'static, Result<T, E>>,
    {
        let key = self.resolve(&key).clone();

        if let Some(existing) = self.entries.get(&key) {
            match existing.peek() {
                None => {
                    self.metrics.record(CacheEvent::Joined);
                    return existing.clone();
                }
                Some(Ok(_)) => {
                    self.metrics.record(CacheEvent::Hit);
                    return existing.clone();
                }
                Some(Err(_)) => {
                    self.metrics.record(CacheEvent::Retried);
                }
            }
        }

        self.metrics.record(CacheEvent::Started);
        let shared = make().shared();
        self.entries.insert(key, shared.clone());
        shared
    }

    /// Drops the entry for `key`, returning its value if it had completed
    /// successfully. The root alias survives so a reload re-populates it.
    pub fn evict(&mut self, key: &ResourceKey) -> Option<T> {
        let key = self.resolve(key).clone();
        let shared = self.entries.remove(&key)?;
        self.metrics.record(CacheEvent::Evicted);
        match shared.peek() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(self.resolve(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> + '_ {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl<T, E> Default for ResourceCache<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for ResourceCache<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("root", &self.root)
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
