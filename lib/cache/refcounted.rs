//! Reference-counted cache for closable resources.
//!
//! [`ResourceCache`] holds at most one live resource per key. Every [`ResourceCache::get`] hands
//! out a [`SharedHandle`] and bumps the entry's count; every released handle drops it again. The
//! release that takes the count to zero closes the resource and removes the entry.
//!
//! All count changes for a key happen inside a single `scc` entry transform, which locks only the
//! bucket holding that key. Creation and lookup for the same key are therefore serialized and can
//! never race into two resource instances, while unrelated keys proceed in parallel.
//!
//! ```ignore
//! let cache = ResourceCache::new(|path: &PathBuf| ZipResource::open(path));
//!
//! let a = cache.get(jar.clone())?; // supplier runs, count = 1
//! let b = cache.get(jar.clone())?; // count = 2
//! a.release()?;                    // count = 1
//! b.release()?;                    // count = 0, archive closed and evicted
//! ```

use std::{
    fmt::{self, Debug},
    hash::Hash,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use scc::hash_map::Entry;
use tracing::{debug, error, trace, warn};

use crate::cache::{
    error::{CloseError, CreationError},
    traits::{BoxError, CloseToken, Resource, SupplyFn, boxed_supplier},
};

/// A resource plus the number of outstanding handles to it.
///
/// The count is only ever modified while the owning bucket is locked, so the atomics here are
/// about interior mutability, not synchronization.
struct Shared<R> {
    resource: R,
    refcount: AtomicUsize,
}

impl<R> Shared<R> {
    fn new(resource: R) -> Self {
        Self {
            resource,
            refcount: AtomicUsize::new(1),
        }
    }

    /// Returns the count after incrementing.
    fn acquire(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the count after decrementing.
    fn decrement(&self) -> usize {
        let prev = self.refcount.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "refcount underflow");
        prev - 1
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    creation_failures: AtomicU64,
    evictions: AtomicU64,
    stale_releases: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            stale_releases: self.stale_releases.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for a [`ResourceCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` calls that found a live entry.
    pub hits: u64,
    /// `get` calls that had to run the supplier.
    pub misses: u64,
    /// Supplier invocations that failed.
    pub creation_failures: u64,
    /// Resources closed, either by the last release or by [`ResourceCache::invalidate_all`].
    pub evictions: u64,
    /// Releases that found their entry already gone or replaced. Nonzero means someone called
    /// [`ResourceCache::invalidate_all`] while handles were still out.
    pub stale_releases: u64,
}

struct Table<K, R> {
    map: scc::HashMap<K, Arc<Shared<R>>>,
    supplier: Box<SupplyFn<K, R>>,
    counters: Counters,
}

impl<K, R> Table<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    /// Decrement the count of `key`'s entry and close the resource if it hit zero.
    ///
    /// `shared` identifies which incarnation of the entry the caller acquired. If the key was
    /// invalidated (and possibly re-created) in the meantime, the release is a no-op.
    fn release(&self, key: &K, shared: &Arc<Shared<R>>) -> Result<(), CloseError> {
        let Entry::Occupied(occ) = self.map.entry_sync(key.clone()) else {
            self.stale_release(key);
            return Ok(());
        };

        if !Arc::ptr_eq(occ.get(), shared) {
            self.stale_release(key);
            return Ok(());
        }

        let remaining = occ.get().decrement();
        if remaining > 0 {
            trace!(?key, remaining, "released resource handle");
            return Ok(());
        }

        // Close before removing so that a concurrent `get` for this key cannot open a second
        // instance while this one is still live.
        debug!(?key, "last handle released, closing resource");
        let closed = occ.get().resource.close(&CloseToken::new());
        drop(occ.remove_entry());
        Counters::bump(&self.counters.evictions);

        closed.map_err(|source| CloseError::resource(key, source))
    }

    fn stale_release(&self, key: &K) {
        Counters::bump(&self.counters.stale_releases);
        warn!(
            ?key,
            "released a handle whose entry was already invalidated; \
             invalidate_all was called while handles were outstanding"
        );
    }
}

/// Caches closable resources and evicts an entry once nobody holds it anymore.
///
/// Cloning the cache is cheap and yields another view of the same table.
pub struct ResourceCache<K, R> {
    table: Arc<Table<K, R>>,
}

impl<K, R> Clone for ResourceCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<K: Eq + Hash, R> Debug for ResourceCache<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("len", &self.table.map.len())
            .field("stats", &self.table.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl<K, R> ResourceCache<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    /// Create a cache that builds missing resources with `supplier`.
    pub fn new<F, E>(supplier: F) -> Self
    where
        F: Fn(&K) -> Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            table: Arc::new(Table {
                map: scc::HashMap::new(),
                supplier: boxed_supplier(supplier),
                counters: Counters::default(),
            }),
        }
    }

    /// Get a handle to the resource for `key`, creating it if there is no live entry.
    ///
    /// On a miss the supplier runs under the key's lock; if it fails nothing is stored and the
    /// error is returned. Every successful call must be paired with exactly one release of the
    /// returned handle (explicitly, or by dropping it).
    pub fn get(&self, key: K) -> Result<SharedHandle<K, R>, CreationError> {
        let shared = match self.table.map.entry_sync(key.clone()) {
            Entry::Occupied(occ) => {
                let count = occ.get().acquire();
                Counters::bump(&self.table.counters.hits);
                trace!(key = ?occ.key(), count, "reusing cached resource");
                Arc::clone(occ.get())
            }
            Entry::Vacant(vac) => {
                Counters::bump(&self.table.counters.misses);
                let resource = match (self.table.supplier)(vac.key()) {
                    Ok(resource) => resource,
                    Err(source) => {
                        Counters::bump(&self.table.counters.creation_failures);
                        debug!(key = ?vac.key(), error = %source, "resource creation failed");
                        return Err(CreationError::new(vac.key(), source));
                    }
                };
                debug!(key = ?vac.key(), "created resource");
                let shared = Arc::new(Shared::new(resource));
                vac.insert_entry(Arc::clone(&shared));
                shared
            }
        };

        Ok(SharedHandle {
            key,
            shared,
            table: Arc::clone(&self.table),
            released: false,
        })
    }

    /// Close and remove every entry, regardless of outstanding handles.
    ///
    /// Intended for shutdown. Handles still held by callers keep pointing at a closed resource,
    /// and their eventual release becomes a no-op (counted in [`CacheStats::stale_releases`]).
    /// A failing close is logged and does not stop the sweep. Returns how many entries were
    /// removed.
    pub fn invalidate_all(&self) -> usize {
        let token = CloseToken::new();
        let mut removed = 0;
        self.table.map.retain_sync(|key, shared| {
            if let Err(err) = shared.resource.close(&token) {
                error!(
                    ?key,
                    error = %err,
                    "failed to close resource; release all handles before invalidate_all to \
                     avoid leaks"
                );
            }
            Counters::bump(&self.table.counters.evictions);
            removed += 1;
            false
        });
        debug!(removed, "invalidated resource cache");
        removed
    }

    /// Whether a live entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.table.map.contains_sync(key)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.map.len()
    }

    /// Returns `true` if no resource is currently open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.map.is_empty()
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.table.counters.snapshot()
    }
}

/// One outstanding reference to a cached resource.
///
/// Dereferences to the resource. Release it with [`release`](Self::release) to observe close
/// failures; dropping it releases too, but a close failure is then only logged.
pub struct SharedHandle<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    key: K,
    shared: Arc<Shared<R>>,
    table: Arc<Table<K, R>>,
    released: bool,
}

impl<K, R> SharedHandle<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    /// The wrapped resource.
    #[must_use]
    pub fn get(&self) -> &R {
        &self.shared.resource
    }

    /// The key this handle was obtained for.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Number of handles currently out for this resource, this one included.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.shared.refcount.load(Ordering::Relaxed)
    }

    /// Whether both handles point at the same resource instance.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.shared, &other.shared)
    }

    /// Give this reference back to the cache.
    ///
    /// If it was the last one, the resource is closed and evicted here, and a close failure is
    /// returned. The entry is removed even when closing fails.
    pub fn release(mut self) -> Result<(), CloseError> {
        self.released = true;
        self.table.release(&self.key, &self.shared)
    }
}

impl<K, R> Deref for SharedHandle<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    type Target = R;

    fn deref(&self) -> &R {
        self.get()
    }
}

impl<K, R> Drop for SharedHandle<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.table.release(&self.key, &self.shared) {
            error!(key = ?self.key, error = %err, "failed to close resource on handle drop");
        }
    }
}

impl<K, R> Debug for SharedHandle<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("key", &self.key)
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}
