//! archive-cache shared library.

/// Reading entries out of shared archive handles.
pub mod archive;
/// Caches for expensive, explicitly closable resources.
pub mod cache;
pub mod io;
