use std::{
    fmt,
    fs::File,
    io::{self, Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    archive::{ArchiveError, EntrySource, ZipResource},
    cache::{CloseError, CreationError, ResourceCache, SharedHandle},
};

/// Default number of bytes requested per read call while loading an entry.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Shared cache of archives, keyed by canonical archive path.
pub type ArchiveCache<A = ZipResource> = ResourceCache<PathBuf, A>;

/// Failures surfaced by [`EntryReader::open_stream`] and reader construction.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// A constructor was given an empty path or entry name.
    #[error("invalid reader: {0}")]
    InvalidArgument(&'static str),

    /// The archive opened, but has no entry by that name.
    #[error("failed to find entry '{entry}' in the archive at '{}'", archive.display())]
    EntryNotFound {
        /// The archive path as given to the reader.
        archive: PathBuf,
        /// The missing entry.
        entry: String,
    },

    /// The archive could not be obtained from the cache.
    #[error("failed to open archive: {0}")]
    Open(#[from] CreationError),

    /// The entry exists but could not be loaded.
    #[error("failed to read entry '{entry}' of the archive at '{}': {source}", archive.display())]
    Read {
        /// The archive path as given to the reader.
        archive: PathBuf,
        /// The entry being loaded.
        entry: String,
        /// What the archive reported.
        #[source]
        source: ArchiveError,
    },

    /// A plain file reader could not open its file.
    #[error("failed to open '{}': {source}", path.display())]
    File {
        /// The file path.
        path: PathBuf,
        /// The underlying IO failure.
        #[source]
        source: io::Error,
    },

    /// The reader was used after [`EntryReader::close`].
    #[error("reader has already been closed")]
    Closed,
}

enum Source {
    Memory(Cursor<Bytes>),
    File(File),
}

/// A stream handed out by [`EntryReader::open_stream`].
///
/// The reader keeps track of every stream it returns and closes them all when it is closed;
/// reading from a stream after that fails.
pub struct EntryStream {
    source: Arc<Mutex<Option<Source>>>,
}

impl EntryStream {
    fn track(source: Source, opened: &mut Vec<Arc<Mutex<Option<Source>>>>) -> Self {
        let source = Arc::new(Mutex::new(Some(source)));
        opened.push(Arc::clone(&source));
        Self { source }
    }

    /// Bytes left to read, when known without touching the file system.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        match self.source.lock().as_ref()? {
            Source::Memory(cursor) => {
                let pos = usize::try_from(cursor.position()).unwrap_or(usize::MAX);
                Some(cursor.get_ref().len().saturating_sub(pos))
            }
            Source::File(_) => None,
        }
    }

    /// Close this stream early. Closing twice is harmless.
    pub fn close(&self) {
        self.source.lock().take();
    }

    /// Whether the stream (or its reader) has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.source.lock().is_none()
    }
}

impl fmt::Debug for EntryStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStream")
            .field("closed", &self.is_closed())
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.source.lock().as_mut() {
            Some(Source::Memory(cursor)) => cursor.read(buf),
            Some(Source::File(file)) => file.read(buf),
            None => Err(io::Error::other("stream has been closed")),
        }
    }
}

fn canonical_or_absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

enum Origin<A: EntrySource> {
    File(PathBuf),
    Archive {
        cache: ArchiveCache<A>,
        path: PathBuf,
        key: PathBuf,
        entry: String,
        handle: Option<SharedHandle<PathBuf, A>>,
    },
}

/// Presents one file, or one entry inside an archive, as readable streams.
///
/// Archive-backed readers take a handle from the shared [`ArchiveCache`] on first use and keep it
/// until [`close`](Self::close), so any number of readers can share one open archive. Entries are
/// loaded fully into memory, which sidesteps decoders that misreport how much of an entry is
/// available.
///
/// Call `close` when done to see failures; dropping the reader closes it too but only logs them.
pub struct EntryReader<A: EntrySource = ZipResource> {
    origin: Origin<A>,
    opened: Vec<Arc<Mutex<Option<Source>>>>,
    chunk_size: usize,
    closed: bool,
}

impl<A: EntrySource> EntryReader<A> {
    /// A reader for a plain file on disk.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self, ReaderError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ReaderError::InvalidArgument("the file path cannot be empty"));
        }
        Ok(Self::with_origin(Origin::File(path)))
    }

    /// A reader for entry `entry` of the archive at `archive`, opened through `cache`.
    ///
    /// The archive is looked up under its canonical path, so `A.jar` and `./A.jar` share one open
    /// archive. Nothing is opened until the first [`open_stream`](Self::open_stream).
    pub fn archive_entry(
        cache: &ArchiveCache<A>,
        archive: impl Into<PathBuf>,
        entry: impl Into<String>,
    ) -> Result<Self, ReaderError> {
        let (path, entry) = (archive.into(), entry.into());
        if path.as_os_str().is_empty() || entry.is_empty() {
            return Err(ReaderError::InvalidArgument(
                "the archive path and entry name cannot be empty",
            ));
        }
        Ok(Self::with_origin(Origin::Archive {
            cache: cache.clone(),
            key: canonical_or_absolute(&path),
            path,
            entry,
            handle: None,
        }))
    }

    fn with_origin(origin: Origin<A>) -> Self {
        Self {
            origin,
            opened: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            closed: false,
        }
    }

    /// Request at most `chunk_size` bytes per read call when loading an entry.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Path of the file, or of the archive holding the entry.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        match &self.origin {
            Origin::File(path) | Origin::Archive { path, .. } => path,
        }
    }

    /// Name of the archive entry, if this reader is archive-backed.
    #[must_use]
    pub fn entry_name(&self) -> Option<&str> {
        match &self.origin {
            Origin::File(_) => None,
            Origin::Archive { entry, .. } => Some(entry),
        }
    }

    /// Whether this reader reads an archive entry rather than a plain file.
    #[must_use]
    pub fn is_archive_entry(&self) -> bool {
        matches!(self.origin, Origin::Archive { .. })
    }

    /// Canonical form of [`file_path`](Self::file_path), or its absolute form if it cannot be
    /// canonicalized (for example because it does not exist).
    #[must_use]
    pub fn absolute_path(&self) -> PathBuf {
        canonical_or_absolute(self.file_path())
    }

    /// The archive this reader holds a handle on, if it has acquired one.
    #[must_use]
    pub fn archive(&self) -> Option<&SharedHandle<PathBuf, A>> {
        match &self.origin {
            Origin::Archive { handle, .. } => handle.as_ref(),
            Origin::File(_) => None,
        }
    }

    /// Open a new, independent stream over the file or entry.
    ///
    /// For archive entries, the first call acquires the archive from the cache; later calls
    /// reuse that handle. A missing entry fails with [`ReaderError::EntryNotFound`]; the handle
    /// stays held until [`close`](Self::close) either way.
    pub fn open_stream(&mut self) -> Result<EntryStream, ReaderError> {
        if self.closed {
            return Err(ReaderError::Closed);
        }

        let source = match &mut self.origin {
            Origin::File(path) => {
                let file = File::open(&*path).map_err(|source| ReaderError::File {
                    path: path.clone(),
                    source,
                })?;
                Source::File(file)
            }
            Origin::Archive {
                cache,
                path,
                key,
                entry,
                handle,
            } => {
                let archive = match *handle {
                    Some(ref mut held) => held,
                    None => handle.insert(cache.get(key.clone())?),
                };
                let bytes = archive
                    .read_entry(entry, self.chunk_size)
                    .map_err(|source| match source {
                        ArchiveError::EntryNotFound { .. } => ReaderError::EntryNotFound {
                            archive: path.clone(),
                            entry: entry.clone(),
                        },
                        source => ReaderError::Read {
                            archive: path.clone(),
                            entry: entry.clone(),
                            source,
                        },
                    })?;
                debug!(archive = %path.display(), %entry, len = bytes.len(), "loaded entry");
                Source::Memory(Cursor::new(bytes))
            }
        };

        Ok(EntryStream::track(source, &mut self.opened))
    }

    /// Close every stream this reader returned, then release its archive handle.
    ///
    /// Every step is attempted even if an earlier one fails. Failures are logged one by one and
    /// returned together as a single [`CloseError::Aggregate`]. Closing again is a no-op.
    pub fn close(&mut self) -> Result<(), CloseError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // In-memory buffers and read-only files have nothing to flush; dropping them is the
        // whole close, so only the handle release can fail.
        for stream in self.opened.drain(..) {
            drop(stream.lock().take());
        }

        let mut failures = Vec::new();
        if let Origin::Archive { handle, .. } = &mut self.origin
            && let Some(handle) = handle.take()
            && let Err(err) = handle.release()
        {
            error!(error = %err, "failed to release archive handle");
            failures.push(err);
        }

        CloseError::collect(failures)
    }
}

impl<A: EntrySource> fmt::Debug for EntryReader<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryReader")
            .field("path", &self.file_path())
            .field("entry", &self.entry_name())
            .field("streams", &self.opened.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<A: EntrySource> Drop for EntryReader<A> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(path = %self.file_path().display(), error = %err, "failed to close reader");
        }
    }
}
