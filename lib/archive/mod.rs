//! Archive handles that can live in a resource cache.

use std::{
    fmt::{self, Debug},
    fs::File,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use zip::{ZipArchive, result::ZipError};

use crate::{
    cache::traits::{CloseToken, Resource},
    io,
};

/// Reads one entry of an archive at a time.
pub mod reader;

pub use reader::{EntryReader, EntryStream, ReaderError};

/// Failures while opening or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive has no entry by that name.
    #[error("no entry named '{entry}' in {}", archive.display())]
    EntryNotFound {
        /// Path of the archive.
        archive: PathBuf,
        /// The missing entry.
        entry: String,
    },

    /// The archive was used after it was closed.
    #[error("archive {} has already been closed", .0.display())]
    Closed(PathBuf),

    /// The archive structure or an entry's data is invalid.
    #[error("malformed archive: {0}")]
    Zip(#[from] ZipError),

    /// Reading the underlying file failed, including checksum mismatches found at the end of an
    /// entry.
    #[error("IO error while reading archive: {0}")]
    Io(#[from] std::io::Error),
}

/// An archive whose entries can be materialized by name.
///
/// Implementations are shared between threads through a cache, so reads must be safe to issue
/// concurrently (serializing them internally is fine).
pub trait EntrySource: Resource {
    /// Read the whole of entry `name` into memory, `chunk_size` bytes per read call at most.
    ///
    /// Fails with [`ArchiveError::EntryNotFound`] when the archive has no such entry.
    fn read_entry(&self, name: &str, chunk_size: usize) -> Result<Bytes, ArchiveError>;
}

/// An open zip (or jar) file.
///
/// Reads take an internal lock, since the zip reader seeks a single file descriptor.
pub struct ZipResource {
    path: PathBuf,
    archive: Mutex<Option<ZipArchive<File>>>,
}

impl ZipResource {
    /// Open the archive at `path` and read its central directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        let archive = ZipArchive::new(File::open(path)?)?;
        debug!(path = %path.display(), entries = archive.len(), "opened archive");
        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(Some(archive)),
        })
    }

    /// Where this archive was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries in the archive.
    pub fn len(&self) -> Result<usize, ArchiveError> {
        self.with_archive(|archive| Ok(archive.len()))
    }

    /// Returns `true` if the archive has no entries.
    pub fn is_empty(&self) -> Result<bool, ArchiveError> {
        Ok(self.len()? == 0)
    }

    /// Names of all entries, in central directory order.
    pub fn entry_names(&self) -> Result<Vec<String>, ArchiveError> {
        self.with_archive(|archive| Ok(archive.file_names().map(str::to_owned).collect()))
    }

    /// Whether [`Resource::close`] has run on this archive.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.archive.lock().is_none()
    }

    fn with_archive<T>(
        &self,
        f: impl FnOnce(&mut ZipArchive<File>) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let mut guard = self.archive.lock();
        let archive = guard
            .as_mut()
            .ok_or_else(|| ArchiveError::Closed(self.path.clone()))?;
        f(archive)
    }
}

impl Resource for ZipResource {
    type Error = ArchiveError;

    fn close(&self, _: &CloseToken) -> Result<(), ArchiveError> {
        match self.archive.lock().take() {
            Some(archive) => {
                drop(archive);
                debug!(path = %self.path.display(), "closed archive");
                Ok(())
            }
            None => Err(ArchiveError::Closed(self.path.clone())),
        }
    }
}

impl EntrySource for ZipResource {
    fn read_entry(&self, name: &str, chunk_size: usize) -> Result<Bytes, ArchiveError> {
        self.with_archive(|archive| {
            let mut entry = match archive.by_name(name) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => {
                    return Err(ArchiveError::EntryNotFound {
                        archive: self.path.clone(),
                        entry: name.to_owned(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            let declared = usize::try_from(entry.size()).map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("entry '{name}' is too large to load into memory"),
                )
            })?;
            Ok(io::read_declared(&mut entry, declared, chunk_size)?)
        })
    }
}

impl Debug for ZipResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipResource")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
