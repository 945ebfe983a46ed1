//! File handle accounting. Kept in its own test binary so no other test
//! opens files concurrently.
#![cfg(target_os = "linux")]

use assetpak::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn open_fds() -> usize {
    fs::read_dir("/proc/self/fd").map(Iterator::count).unwrap_or(0)
}

#[test]
fn test_reads_release_file_handles() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fd.apak");
    fs::write(dir.path().join("present.txt"), "outside bytes").unwrap();

    let mut catalog = Catalog::new(ManifestHead::new(PackageKey::new("g", "fd"), "fd", "1"));
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("data", "in the data region"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::binary("inline", vec![3; 1000]),
        StorageMode::InManifest,
    ));
    catalog.items.push(ManifestItem::outside("present", "text", "present.txt"));
    catalog.items.push(
        ManifestItem::outside("absent", "text", "absent.txt").with_hash_policy(HashPolicy::Skip),
    );
    ContainerOperations::create(&mut catalog, &path).unwrap();

    // A copy whose outside file goes missing after writing, so reads fail
    let broken_dir = dir.path().join("broken");
    fs::create_dir_all(&broken_dir).unwrap();
    let broken = broken_dir.join("fd.apak");
    fs::copy(&path, &broken).unwrap();

    let reader = ContainerReader::new(Arc::new(TypeRegistry::with_builtins()));
    let baseline = open_fds();

    for _ in 0..20 {
        let eager = reader.read(&path, &mut LoadPolicy::new()).unwrap();
        assert_eq!(eager.items.len(), 4);

        let lazy = reader.read(&path, &mut LoadPolicy::lazy()).unwrap();
        for item in &lazy.items {
            item.asset.as_ref().unwrap().get().unwrap();
        }

        let err = reader.read(&broken, &mut LoadPolicy::new()).unwrap_err();
        assert_eq!(err.item_id(), Some("present"));

        ContainerOperations::list(&path).unwrap();
        ContainerOperations::read_head(&path).unwrap();
    }

    assert_eq!(open_fds(), baseline);
}
