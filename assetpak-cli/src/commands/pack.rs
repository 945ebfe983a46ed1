use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use walkdir::WalkDir;

use assetpak::asset::{Asset, AssetKind, Record};
use assetpak::config::PackConfig;
use assetpak::container::{Catalog, ContainerWriter, ManifestHead, ManifestItem, PackageKey, StorageMode};
use assetpak::registry::TypeRegistry;

pub struct PackArgs<'a> {
    pub group: &'a str,
    pub version: &'a str,
    pub inline_below: u64,
}

/// Asset class for a file, by extension
fn kind_for(path: &Path) -> AssetKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "xml" | "lsx" | "csv" | "toml" | "yaml" | "yml" => AssetKind::Text,
        "png" | "jpg" | "jpeg" | "gif" | "dds" => AssetKind::Image,
        "json" => AssetKind::Record,
        _ => AssetKind::Binary,
    }
}

/// Build an asset from file bytes, falling back to binary when the bytes
/// do not fit the extension's class
fn load_asset(id: &str, path: &Path) -> anyhow::Result<Asset> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let asset = match kind_for(path) {
        AssetKind::Text => match String::from_utf8(bytes) {
            Ok(text) => Asset::text(id, text),
            Err(e) => Asset::binary(id, e.into_bytes()),
        },
        AssetKind::Record => match serde_json::from_slice::<Record>(&bytes) {
            Ok(record) => Asset::record(id, record),
            Err(_) => Asset::binary(id, bytes),
        },
        AssetKind::Image => Asset::image(id, bytes),
        AssetKind::Binary => Asset::binary(id, bytes),
    };
    Ok(asset)
}

pub fn execute(
    source: &Path,
    destination: &Path,
    args: &PackArgs<'_>,
    config: &PackConfig,
) -> anyhow::Result<()> {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "package".to_string());
    let head = ManifestHead::new(PackageKey::new(args.group, &name), &name, args.version);
    let mut catalog = Catalog::new(head);

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(source)?;
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let storage = if entry.metadata()?.len() < args.inline_below {
            StorageMode::InManifest
        } else {
            StorageMode::ManifestData
        };
        let asset = load_asset(&id, entry.path())?;
        tracing::debug!("Packing '{}' as {} ({})", id, asset.type_name, storage);
        catalog.add_item(
            ManifestItem::from_asset(asset, storage),
            config.writer.duplicate_ids,
        )?;
    }

    let writer = ContainerWriter::new(Arc::new(TypeRegistry::with_builtins()))
        .with_options(config.writer.clone());
    let summary = writer.create(&mut catalog, destination)?;

    println!(
        "✓ Packed {} items into {} ({} data bytes, {} inline bytes)",
        summary.item_count,
        summary.path.display(),
        summary.header.data_length,
        summary.inline_bytes
    );
    Ok(())
}
