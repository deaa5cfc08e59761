/// Errors raised by cache operations.
pub mod error;
/// Process-lifetime cache whose handles cannot be closed by holders.
pub mod pinned;
/// Reference-counted cache that closes a resource once its last handle is released.
pub mod refcounted;
/// The resource contract the caches manage.
pub mod traits;

pub use error::{CloseError, CreationError};
pub use pinned::{Pinned, PinnedCache};
pub use refcounted::{CacheStats, ResourceCache, SharedHandle};
pub use traits::{BoxError, CloseToken, Resource};
