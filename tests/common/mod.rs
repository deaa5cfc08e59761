#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use archive_cache::archive::{ArchiveError, EntrySource};
use archive_cache::cache::{CloseToken, Resource};
use bytes::Bytes;
use zip::write::SimpleFileOptions;

/// Shared counters for every [`MockResource`] produced by one [`MockSupplier`].
#[derive(Debug, Default)]
pub struct Ledger {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    /// Number of supplier calls that should fail before creation succeeds again.
    pub fail_next: AtomicUsize,
    /// When set, every close reports an error (after counting itself).
    pub fail_close: AtomicBool,
}

impl Ledger {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("mock failure: {0}")]
pub struct MockError(pub &'static str);

/// A resource that records its lifecycle and refuses use after close.
#[derive(Debug)]
pub struct MockResource {
    pub id: usize,
    pub key: u64,
    closed: AtomicBool,
    ledger: Arc<Ledger>,
}

impl MockResource {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Resource for MockResource {
    type Error = MockError;

    fn close(&self, _: &CloseToken) -> Result<(), MockError> {
        assert!(
            !self.closed.swap(true, Ordering::SeqCst),
            "resource {} for key {} closed twice",
            self.id,
            self.key
        );
        self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        if self.ledger.fail_close.load(Ordering::SeqCst) {
            return Err(MockError("close refused"));
        }
        Ok(())
    }
}

/// Builds a supplier closure over a fresh ledger.
pub fn mock_supplier() -> (
    Arc<Ledger>,
    impl Fn(&u64) -> Result<MockResource, MockError> + Send + Sync + 'static,
) {
    let ledger = Arc::new(Ledger::default());
    let for_supplier = Arc::clone(&ledger);
    let supplier = move |key: &u64| {
        let should_fail = for_supplier
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(MockError("supplier refused"));
        }
        let id = for_supplier.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockResource {
            id,
            key: *key,
            closed: AtomicBool::new(false),
            ledger: Arc::clone(&for_supplier),
        })
    };
    (ledger, supplier)
}

/// In-memory archive whose close can be made to fail.
#[derive(Debug)]
pub struct MemoryArchive {
    pub entries: Vec<(String, Vec<u8>)>,
    pub closed: AtomicBool,
    pub fail_close: bool,
    pub path: PathBuf,
}

impl Resource for MemoryArchive {
    type Error = ArchiveError;

    fn close(&self, _: &CloseToken) -> Result<(), ArchiveError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(ArchiveError::Io(std::io::Error::other("close refused")));
        }
        Ok(())
    }
}

impl EntrySource for MemoryArchive {
    fn read_entry(&self, name: &str, _chunk_size: usize) -> Result<Bytes, ArchiveError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ArchiveError::Closed(self.path.clone()));
        }
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| Bytes::copy_from_slice(data))
            .ok_or_else(|| ArchiveError::EntryNotFound {
                archive: self.path.clone(),
                entry: name.to_owned(),
            })
    }
}

/// Write a zip archive at `dir/name` holding `entries`, returning its path.
pub fn write_jar(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    write_jar_with(dir, name, entries, zip::CompressionMethod::Deflated)
}

/// Like [`write_jar`], with every entry compressed by `method`.
pub fn write_jar_with(
    dir: &Path,
    name: &str,
    entries: &[(&str, &[u8])],
    method: zip::CompressionMethod,
) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(method);
    for (entry, data) in entries {
        writer.start_file(*entry, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
    path
}

/// `A.jar` holding a 10-byte `X.class` and an empty `Y.class`.
pub fn sample_jar(dir: &Path) -> PathBuf {
    write_jar(
        dir,
        "A.jar",
        &[("X.class", b"0123456789"), ("Y.class", b"")],
    )
}
