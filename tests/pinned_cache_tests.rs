#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;

use archive_cache::archive::ZipResource;
use archive_cache::cache::{Pinned, PinnedCache};
use common::{mock_supplier, sample_jar};

#[test]
fn get_opens_once_and_shares() {
    let (ledger, supplier) = mock_supplier();
    let cache = PinnedCache::new(supplier);

    let a = cache.get(1).unwrap();
    let b = cache.get(1).unwrap();
    let c = b.clone();
    assert!(Pinned::ptr_eq(&a, &b));
    assert!(Pinned::ptr_eq(&b, &c));
    assert_eq!(ledger.created(), 1);

    // Dropping pinned pointers never closes anything.
    drop((a, b, c));
    assert_eq!(ledger.closed(), 0);
    assert!(cache.contains(&1));
}

#[test]
fn failed_open_stores_nothing() {
    let (ledger, supplier) = mock_supplier();
    let cache = PinnedCache::new(supplier);
    ledger.fail_next.store(1, Ordering::SeqCst);

    assert!(cache.get(3).is_err());
    assert!(cache.is_empty());
    assert!(cache.get(3).is_ok());
    assert_eq!(cache.len(), 1);
}

#[test]
fn invalidate_all_is_the_only_close() {
    let (ledger, supplier) = mock_supplier();
    let cache = PinnedCache::new(supplier);

    let held: Vec<_> = (0..8).map(|key| cache.get(key).unwrap()).collect();
    assert_eq!(cache.invalidate_all(), 8);
    assert_eq!(ledger.closed(), 8);
    assert!(held.iter().all(|p| p.is_closed()));
    assert!(cache.is_empty());

    // A second sweep finds nothing to close.
    assert_eq!(cache.invalidate_all(), 0);
    assert_eq!(ledger.closed(), 8);
}

#[test]
fn concurrent_first_use_opens_once() {
    let (ledger, supplier) = mock_supplier();
    let cache = PinnedCache::new(supplier);

    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                let pinned = cache.get(0).unwrap();
                assert!(!pinned.is_closed());
            });
        }
    });

    assert_eq!(ledger.created(), 1);
}

#[test]
fn pins_real_archives() {
    let dir = tempfile::tempdir().unwrap();
    let jar = sample_jar(dir.path());
    let cache = PinnedCache::new(|path: &PathBuf| ZipResource::open(path));

    let archive = cache.get(jar.clone()).unwrap();
    assert_eq!(archive.len().unwrap(), 2);
    assert_eq!(archive.entry_names().unwrap(), vec!["X.class", "Y.class"]);

    cache.invalidate_all();
    assert!(archive.is_closed());
    assert!(archive.len().is_err());
}
