use assetpak::hash::crc8;
use assetpak::prelude::*;
use assetpak::registry::TextSerializer;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

fn head() -> ManifestHead {
    ManifestHead::new(PackageKey::new("com.demo", "pack"), "demo", "1.0.0")
        .with_remark("integration <fixture> & friends")
        .with_created(Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap())
}

fn reader() -> ContainerReader {
    ContainerReader::new(Arc::new(TypeRegistry::with_builtins()))
}

fn writer() -> ContainerWriter {
    ContainerWriter::new(Arc::new(TypeRegistry::with_builtins()))
}

fn png_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend((0..len - 8).map(|i| (i % 256) as u8));
    bytes
}

fn body_of(catalog: &Catalog, id: &str) -> AssetBody {
    catalog
        .item(id)
        .and_then(|item| item.asset.as_ref())
        .expect("asset slot")
        .get()
        .unwrap()
        .body
        .clone()
}

/// Flip one byte of a file in place
fn corrupt(path: &Path, offset: u64) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset as usize] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("round.apak");

    let big: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(31) % 256) as u8).collect();
    let mut record = Record::new();
    record.insert("name".into(), serde_json::json!("sword"));
    record.insert("damage".into(), serde_json::json!([1, 6]));

    let mut catalog = Catalog::new(head());
    for item in [
        ManifestItem::from_asset(Asset::text("a", "alpha text"), StorageMode::ManifestData),
        ManifestItem::from_asset(Asset::binary("blob", big.clone()), StorageMode::InManifest),
        ManifestItem::from_asset(Asset::record("stats", record.clone()), StorageMode::InManifest),
        ManifestItem::from_asset(Asset::image("icon", png_bytes(512)), StorageMode::ManifestData),
        ManifestItem::from_asset(Asset::text("empty", ""), StorageMode::InManifest),
    ] {
        catalog.add_item(item, ConflictPolicy::Reject).unwrap();
    }

    let options = WriterOptions {
        chunk_size: 4096,
        ..WriterOptions::default()
    };
    writer().with_options(options).create(&mut catalog, &path).unwrap();

    let read = reader().read(&path, &mut LoadPolicy::new()).unwrap();
    assert_eq!(read.head.key, head().key);
    assert_eq!(read.head.version, "1.0.0");
    assert_eq!(read.head.name, "demo");
    assert_eq!(read.head.remark, head().remark);
    assert_eq!(read.head.created, head().created);
    assert_eq!(read.head.file_path.as_deref(), Some(std::path::absolute(&path).unwrap().as_path()));

    let ids: Vec<&str> = read.items.iter().map(|i| i.asset_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "blob", "stats", "icon", "empty"]);

    assert_eq!(body_of(&read, "a"), AssetBody::Text("alpha text".into()));
    assert_eq!(body_of(&read, "blob"), AssetBody::Binary(big));
    assert_eq!(body_of(&read, "stats"), AssetBody::Record(record));
    assert_eq!(body_of(&read, "icon"), Asset::image("icon", png_bytes(512)).body);
    assert_eq!(body_of(&read, "empty"), AssetBody::Text(String::new()));

    // Locations survive for data items only
    assert!(read.item("a").unwrap().location.is_some());
    assert!(read.item("blob").unwrap().location.is_none());
    assert_eq!(read.item("blob").unwrap().storage, StorageMode::InManifest);
}

#[test]
fn test_concrete_scenario() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("demo.apak");
    fs::create_dir_all(dir.path().join("textures")).unwrap();
    fs::write(dir.path().join("textures/b.png"), png_bytes(4096)).unwrap();

    let text = "x".repeat(100);
    let mut catalog = Catalog::new(head());
    catalog
        .add_item(
            ManifestItem::from_asset(Asset::text("A", text.clone()), StorageMode::ManifestData),
            ConflictPolicy::Reject,
        )
        .unwrap();
    catalog
        .add_item(
            ManifestItem::outside("B", "image", "textures/b.png"),
            ConflictPolicy::Reject,
        )
        .unwrap();
    let summary = ContainerOperations::create(&mut catalog, &path).unwrap();
    assert!(summary.materialized.is_empty());

    let read = ContainerOperations::read(&path).unwrap();
    assert_eq!(read.items.len(), 2);
    assert_eq!(read.items[0].asset_id, "A");
    assert_eq!(body_of(&read, "A"), AssetBody::Text(text));
    let AssetBody::Image(image) = body_of(&read, "B") else {
        panic!("expected image");
    };
    assert_eq!(image.data.len(), 4096);
    assert_eq!(image.format, assetpak::asset::ImageFormat::Png);
    assert_eq!(read.items[1].hash, Some(ContentHash::of(&png_bytes(4096))));

    let bytes = fs::read(&path).unwrap();
    assert_eq!(crc8(&bytes[..65]), bytes[65]);
    assert_eq!(&bytes[..4], b"APAK");
    let header = ContainerReader::read_header(&path).unwrap();
    assert_eq!(header, summary.header);
    assert_eq!(header.data_length, 100);
}

#[test]
fn test_header_corruption_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("h.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("a", "hello"),
        StorageMode::ManifestData,
    ));
    writer().create(&mut catalog, &path).unwrap();

    corrupt(&path, 10);
    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert!(matches!(err, Error::HeaderChecksumMismatch { .. }));
    assert!(ContainerOperations::read_head(&path).is_err());
}

#[test]
fn test_item_hash_mismatch_names_item() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hash.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("first", "untouched bytes"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("second", "bytes that will be corrupted"),
        StorageMode::ManifestData,
    ));
    let summary = writer().create(&mut catalog, &path).unwrap();

    let range = catalog.item("second").unwrap().location.unwrap();
    corrupt(&path, summary.header.data_offset + range.start + 5);

    // Default options: the data region hash also fails, but the item wins
    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert_eq!(err.item_id(), Some("second"));
    assert!(matches!(err.root(), Error::ContentHashMismatch { .. }));
    assert!(err.trail().starts_with("item 'second' -> "));

    let err = ContainerOperations::verify(&path).unwrap_err();
    assert_eq!(err.item_id(), Some("second"));
}

#[test]
fn test_inline_hash_mismatch_names_item() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("inline_hash.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("plain", "kept in the data region"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("inline", "inline bytes that will be corrupted"),
        StorageMode::InManifest,
    ));
    writer().create(&mut catalog, &path).unwrap();

    // Swap one base64 character inside the payload chunk, keeping it decodable
    let mut bytes = fs::read(&path).unwrap();
    let chunk = bytes
        .windows(7)
        .position(|w| w == b"<chunk>")
        .expect("inline chunk")
        + 7;
    bytes[chunk + 4] = if bytes[chunk + 4] == b'A' { b'B' } else { b'A' };
    fs::write(&path, bytes).unwrap();

    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert_eq!(err.item_id(), Some("inline"));
    assert!(matches!(err.root(), Error::ContentHashMismatch { .. }));
}

#[test]
fn test_region_mismatch_reported_when_no_item_catches_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unhashed.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(
        ManifestItem::from_asset(Asset::binary("raw", vec![3; 64]), StorageMode::ManifestData)
            .with_hash_policy(HashPolicy::Skip),
    );
    let summary = writer().create(&mut catalog, &path).unwrap();
    corrupt(&path, summary.header.data_offset + 10);

    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert!(matches!(
        err,
        Error::RegionHashMismatch { region: assetpak::container::Region::Data, .. }
    ));
    assert_eq!(err.item_id(), None);

    let lenient = reader().with_options(ReaderOptions {
        verify_data_region: false,
        ..ReaderOptions::default()
    });
    let read = lenient.read(&path, &mut LoadPolicy::new()).unwrap();
    assert_eq!(read.items.len(), 1);
}

#[test]
fn test_outside_missing_without_hash_is_tolerated() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outside.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(
        ManifestItem::outside("notes", "text", "notes/readme.txt")
            .with_asset(Asset::text("notes", "written next to the container"))
            .with_hash_policy(HashPolicy::Skip),
    );
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("kept", "still here"),
        StorageMode::ManifestData,
    ));
    let summary = writer().create(&mut catalog, &path).unwrap();
    assert_eq!(summary.materialized, vec![dir.path().join("notes/readme.txt")]);

    fs::remove_file(dir.path().join("notes/readme.txt")).unwrap();

    let read = reader().read(&path, &mut LoadPolicy::new()).unwrap();
    assert_eq!(read.items.len(), 2);
    assert_eq!(body_of(&read, "notes"), AssetBody::Text(String::new()));
    assert_eq!(body_of(&read, "kept"), AssetBody::Text("still here".into()));
}

#[test]
fn test_outside_missing_with_hash_aborts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("outside.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(
        ManifestItem::outside("notes", "text", "readme.txt")
            .with_asset(Asset::text("notes", "hashed content")),
    );
    writer().create(&mut catalog, &path).unwrap();
    assert!(catalog.items[0].hash.is_some());

    fs::remove_file(dir.path().join("readme.txt")).unwrap();

    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert_eq!(err.item_id(), Some("notes"));
    assert!(matches!(err.root(), Error::OutsideFileMissing { .. }));
}

/// Text serializer that counts decodes
struct CountingSerializer {
    decodes: Arc<AtomicUsize>,
}

impl AssetSerializer for CountingSerializer {
    fn kind(&self) -> AssetKind {
        AssetKind::Text
    }

    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> assetpak::Result<()> {
        TextSerializer.serialize(asset, out)
    }

    fn deserialize(&self, input: &mut dyn Read, length: u64) -> assetpak::Result<AssetBody> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        TextSerializer.deserialize(input, length)
    }
}

fn counting_registry(decodes: &Arc<AtomicUsize>) -> Arc<TypeRegistry> {
    let registry = TypeRegistry::with_builtins();
    let decodes = Arc::clone(decodes);
    registry
        .register_with(
            "counted",
            AssetKind::Text,
            move || {
                Box::new(CountingSerializer {
                    decodes: Arc::clone(&decodes),
                })
            },
            ConflictPolicy::Reject,
        )
        .unwrap();
    Arc::new(registry)
}

#[test]
fn test_lazy_proxy_defers_decoding() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lazy.apak");
    let decodes = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(&decodes);

    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::new("big", "counted", AssetBody::Text("deferred body".into())),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::new("inline", "counted", AssetBody::Text("inline body".into())),
        StorageMode::InManifest,
    ));
    ContainerWriter::new(Arc::clone(&registry))
        .create(&mut catalog, &path)
        .unwrap();

    let read = ContainerReader::new(registry)
        .read(&path, &mut LoadPolicy::lazy())
        .unwrap();
    assert_eq!(decodes.load(Ordering::SeqCst), 0);

    let proxy = read.item("big").unwrap().asset.as_ref().unwrap().as_lazy().unwrap().clone();
    assert!(!proxy.is_loaded());
    let first = proxy.get().unwrap();
    assert_eq!(first.body, AssetBody::Text("deferred body".into()));
    proxy.get().unwrap();
    assert_eq!(decodes.load(Ordering::SeqCst), 1);

    assert!(proxy.unload().unwrap());
    let second = proxy.get().unwrap();
    assert_eq!(decodes.load(Ordering::SeqCst), 2);
    assert_eq!(*first, *second);

    // Spilled inline payloads stay readable through the proxy
    assert_eq!(body_of(&read, "inline"), AssetBody::Text("inline body".into()));
    assert_eq!(decodes.load(Ordering::SeqCst), 3);
}

#[test]
fn test_registry_policies_through_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("types.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::new("n", "note", AssetBody::Text("hi".into())),
        StorageMode::ManifestData,
    ));

    // Unregistered type fails the write and names the item
    let err = writer().create(&mut catalog, &path).unwrap_err();
    assert_eq!(err.item_id(), Some("n"));
    assert!(matches!(err.root(), Error::UnknownAssetType(_)));

    let registry = Arc::new(TypeRegistry::with_builtins());
    registry
        .register::<TextSerializer>("note", AssetKind::Text, ConflictPolicy::Reject)
        .unwrap();
    assert!(registry
        .register::<assetpak::registry::BinarySerializer>("note", AssetKind::Binary, ConflictPolicy::Reject)
        .is_err());
    ContainerWriter::new(Arc::clone(&registry))
        .create(&mut catalog, &path)
        .unwrap();

    // Builtins alone cannot resolve it on read either
    let err = reader().read(&path, &mut LoadPolicy::new()).unwrap_err();
    assert_eq!(err.item_id(), Some("n"));

    // Override swaps the class seen by readers
    registry
        .register::<assetpak::registry::BinarySerializer>("note", AssetKind::Binary, ConflictPolicy::Override)
        .unwrap();
    let read = ContainerReader::new(registry)
        .read(&path, &mut LoadPolicy::new())
        .unwrap();
    assert_eq!(body_of(&read, "n"), AssetBody::Binary(b"hi".to_vec()));
}

#[test]
fn test_side_file_handler() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("side.apak");
    let side = dir.path().join("cache.bin");

    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("a", "first asset"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::binary("b", vec![7; 300]),
        StorageMode::InManifest,
    ));
    writer().create(&mut catalog, &path).unwrap();

    let mut policy = LoadPolicy::new().with_selector(|_, _| LoadMode::Custom("side".into()));
    policy
        .register_handler("side", SideFileHandler::new(&side), ConflictPolicy::Reject)
        .unwrap();
    let read = reader().read(&path, &mut policy).unwrap();

    // The container is no longer needed
    fs::remove_file(&path).unwrap();
    assert_eq!(fs::metadata(&side).unwrap().len(), 11 + 300);
    assert_eq!(body_of(&read, "a"), AssetBody::Text("first asset".into()));
    assert_eq!(body_of(&read, "b"), AssetBody::Binary(vec![7; 300]));
}

#[test]
fn test_side_file_removed_on_failure() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("side.apak");
    let side = dir.path().join("cache.bin");

    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("a", "first asset"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("b", "second asset"),
        StorageMode::ManifestData,
    ));
    let summary = writer().create(&mut catalog, &path).unwrap();
    let range = catalog.item("b").unwrap().location.unwrap();
    corrupt(&path, summary.header.data_offset + range.start);

    let mut policy = LoadPolicy::new().with_selector(|_, _| LoadMode::Custom("side".into()));
    policy
        .register_handler("side", SideFileHandler::new(&side), ConflictPolicy::Reject)
        .unwrap();
    let err = reader().read(&path, &mut policy).unwrap_err();
    assert_eq!(err.item_id(), Some("b"));
    assert!(!side.exists());
}

#[test]
fn test_list_and_verify() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ops.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("a", "12345"),
        StorageMode::ManifestData,
    ));
    catalog.items.push(
        ManifestItem::from_asset(Asset::text("b", "123"), StorageMode::InManifest)
            .with_hash_policy(HashPolicy::Skip),
    );
    ContainerOperations::create(&mut catalog, &path).unwrap();

    let listing = ContainerOperations::list(&path).unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].length, Some(5));
    assert_eq!(listing[1].length, Some(3));
    assert_eq!(listing[1].hash, None);

    let report = ContainerOperations::verify(&path).unwrap();
    assert_eq!(report.item_count, 2);
    assert_eq!(report.unverified, vec!["b".to_string()]);
    assert_eq!(report.head.name, "demo");

    let (header, head) = ContainerOperations::read_head(&path).unwrap();
    assert_eq!(header, report.header);
    assert_eq!(head.key, report.head.key);
}

#[test]
fn test_progress_phases() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("progress.apak");
    let mut catalog = Catalog::new(head());
    catalog.items.push(ManifestItem::from_asset(
        Asset::text("a", "x"),
        StorageMode::ManifestData,
    ));

    let phases = std::sync::Mutex::new(Vec::new());
    writer()
        .create_with_progress(&mut catalog, &path, &|p: &ContainerProgress| {
            phases.lock().unwrap().push(p.phase);
        })
        .unwrap();
    reader()
        .read_with_progress(&path, &mut LoadPolicy::new(), &|p: &ContainerProgress| {
            phases.lock().unwrap().push(p.phase);
        })
        .unwrap();

    let phases = phases.into_inner().unwrap();
    assert_eq!(phases.first(), Some(&assetpak::container::ContainerPhase::StagingItems));
    assert_eq!(phases.last(), Some(&assetpak::container::ContainerPhase::Complete));
    assert!(phases.contains(&assetpak::container::ContainerPhase::LoadingItems));
}
