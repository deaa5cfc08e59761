//! Process-lifetime cache without reference counting.
//!
//! [`PinnedCache`] opens each resource once and keeps it until [`PinnedCache::invalidate_all`].
//! Holders get a [`Pinned`] pointer which can be cloned and shared freely, and which deliberately
//! has no way to release or close the resource. There is no eviction and no bound on the number of
//! open resources, so this only makes sense when the set of keys is small and the resources should
//! live as long as the process anyway.

use std::{
    fmt::{self, Debug},
    hash::Hash,
    ops::Deref,
    sync::Arc,
};

use scc::hash_map::Entry;
use tracing::{debug, error};

use crate::cache::{
    error::CreationError,
    traits::{BoxError, CloseToken, Resource, SupplyFn, boxed_supplier},
};

/// Shared pointer to a resource owned by a [`PinnedCache`].
///
/// Only [`PinnedCache::invalidate_all`] closes the resource; a holder cannot:
///
/// ```compile_fail
/// use std::path::PathBuf;
/// use archive_cache::{
///     archive::ZipResource,
///     cache::{CloseToken, PinnedCache, Resource},
/// };
///
/// let cache = PinnedCache::new(|path: &PathBuf| ZipResource::open(path));
/// let pinned = cache.get(PathBuf::from("A.jar")).unwrap();
/// pinned.close(&CloseToken::new()).unwrap();
/// ```
pub struct Pinned<R> {
    resource: Arc<R>,
}

impl<R> Pinned<R> {
    /// The wrapped resource.
    #[must_use]
    pub fn get(&self) -> &R {
        &self.resource
    }

    /// Whether both pointers refer to the same resource instance.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.resource, &other.resource)
    }
}

impl<R> Clone for Pinned<R> {
    fn clone(&self) -> Self {
        Self {
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<R> Deref for Pinned<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Debug> Debug for Pinned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pinned").field(&self.resource).finish()
    }
}

/// Opens each key's resource once and keeps it open for the life of the process.
pub struct PinnedCache<K, R> {
    map: scc::HashMap<K, Pinned<R>>,
    supplier: Box<SupplyFn<K, R>>,
}

impl<K, R> PinnedCache<K, R>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    R: Resource,
{
    /// Create a cache that opens missing resources with `supplier`.
    pub fn new<F, E>(supplier: F) -> Self
    where
        F: Fn(&K) -> Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            map: scc::HashMap::new(),
            supplier: boxed_supplier(supplier),
        }
    }

    /// Get the resource for `key`, opening it on first use. A failed open stores nothing.
    pub fn get(&self, key: K) -> Result<Pinned<R>, CreationError> {
        match self.map.entry_sync(key) {
            Entry::Occupied(occ) => Ok(occ.get().clone()),
            Entry::Vacant(vac) => {
                let resource = (self.supplier)(vac.key())
                    .map_err(|source| CreationError::new(vac.key(), source))?;
                debug!(key = ?vac.key(), "opened pinned resource");
                let pinned = Pinned {
                    resource: Arc::new(resource),
                };
                vac.insert_entry(pinned.clone());
                Ok(pinned)
            }
        }
    }

    /// Close every resource and empty the cache. Meant for process shutdown only: outstanding
    /// [`Pinned`] pointers are left holding closed resources. Returns how many were closed.
    pub fn invalidate_all(&self) -> usize {
        let token = CloseToken::new();
        let mut closed = 0;
        self.map.retain_sync(|key, pinned| {
            if let Err(err) = pinned.resource.close(&token) {
                error!(?key, error = %err, "failed to close pinned resource");
            }
            closed += 1;
            false
        });
        debug!(closed, "invalidated pinned cache");
        closed
    }

    /// Whether `key` has been opened.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_sync(key)
    }

    /// Number of open resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing has been opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Eq + Hash, R> Debug for PinnedCache<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedCache")
            .field("len", &self.map.len())
            .finish_non_exhaustive()
    }
}
