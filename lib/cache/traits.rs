use std::error::Error;

/// Boxed error produced by suppliers and resource closes.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Something that owns an expensive, explicitly closable handle.
///
/// Caches in this crate never clone a resource. They hold exactly one instance per key and call
/// [`close`](Resource::close) on it exactly once, when the last holder lets go (or when the cache
/// is invalidated wholesale).
///
/// Closing takes a [`CloseToken`], which only the caches can create. Holders reach the resource
/// through `Deref`, but they cannot close it from under the other holders:
///
/// ```compile_fail
/// use std::convert::Infallible;
/// use archive_cache::cache::{CloseToken, Resource, ResourceCache};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     type Error = Infallible;
///
///     fn close(&self, _: &CloseToken) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
///
/// let cache = ResourceCache::new(|_: &u32| Ok::<_, Infallible>(Conn));
/// let handle = cache.get(1).unwrap();
/// handle.close(&CloseToken { _private: () }).unwrap();
/// ```
pub trait Resource: Send + Sync + 'static {
    /// Error reported by [`close`](Resource::close).
    type Error: Error + Send + Sync + 'static;

    /// Release the underlying handle.
    ///
    /// Takes `&self` because other holders may still own a pointer to the resource when a cache
    /// is invalidated. Implementations must make subsequent use of the resource fail cleanly
    /// rather than touch a released handle.
    fn close(&self, token: &CloseToken) -> Result<(), Self::Error>;
}

/// Permission to call [`Resource::close`]. Only the caches in this crate can create one.
///
/// Implementations outside the crate just accept it:
///
/// ```
/// use std::convert::Infallible;
/// use archive_cache::cache::{CloseToken, Resource, ResourceCache};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     type Error = Infallible;
///
///     fn close(&self, _: &CloseToken) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
///
/// let cache = ResourceCache::new(|_: &u32| Ok::<_, Infallible>(Conn));
/// cache.get(1).unwrap().release().unwrap();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug)]
pub struct CloseToken {
    _private: (),
}

impl CloseToken {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

/// Creates the resource for a key on a cache miss. Runs under the key's lock.
pub(crate) type SupplyFn<K, R> = dyn Fn(&K) -> Result<R, BoxError> + Send + Sync;

pub(crate) fn boxed_supplier<K, R, E, F>(supplier: F) -> Box<SupplyFn<K, R>>
where
    K: 'static,
    R: 'static,
    F: Fn(&K) -> Result<R, E> + Send + Sync + 'static,
    E: Into<BoxError> + 'static,
{
    Box::new(move |key: &K| supplier(key).map_err(Into::into))
}
