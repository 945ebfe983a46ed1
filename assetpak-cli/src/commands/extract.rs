use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assetpak::asset::AssetRef;
use assetpak::config::PackConfig;
use assetpak::container::{ContainerProgress, ContainerReader, ItemSource, ManifestItem};
use assetpak::loading::{LazyAsset, LazySource, LoadHandler, LoadMode, LoadPolicy};
use assetpak::registry::{ConflictPolicy, TypeRegistry};

/// Writes each item's raw bytes to `<dir>/<id>` and hands back proxies
/// over the written files
struct ExtractHandler {
    dir: PathBuf,
    written: Vec<PathBuf>,
    names: HashSet<String>,
}

impl ExtractHandler {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            written: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// File name for `asset_id`, suffixed when another id already mapped to it
    fn unique_name(&mut self, asset_id: &str) -> String {
        let base = file_name_for(asset_id);
        let mut name = base.clone();
        let mut n = 1;
        while !self.names.insert(name.clone()) {
            name = format!("{base}.{n}");
            n += 1;
        }
        if name != base {
            tracing::warn!("'{}' collides with an earlier item, extracting as {}", asset_id, name);
        }
        name
    }
}

impl LoadHandler for ExtractHandler {
    fn handle(
        &mut self,
        item: &ManifestItem,
        mut source: ItemSource,
        registry: &TypeRegistry,
    ) -> assetpak::Result<AssetRef> {
        let info = registry.resolve(&item.type_name)?;
        let name = self.unique_name(&item.asset_id);
        let target = self.dir.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(&target)?);
        let length = io::copy(&mut source, &mut out)?;
        out.flush()?;

        tracing::info!("Extracted '{}' ({} bytes)", item.asset_id, length);
        self.written.push(target.clone());
        Ok(AssetRef::Lazy(Arc::new(LazyAsset::new(
            &item.asset_id,
            info,
            LazySource::file(target, length),
        ))))
    }

    fn on_failure(&mut self, _error: &assetpak::Error) -> assetpak::Result<()> {
        for path in self.written.drain(..) {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

/// Map an asset id to a safe relative file name
fn file_name_for(asset_id: &str) -> String {
    let name: String = asset_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        format!("_{name}")
    } else {
        name
    }
}

pub fn execute(file: &Path, destination: &Path, config: &PackConfig) -> anyhow::Result<()> {
    fs::create_dir_all(destination)?;

    let mut policy = LoadPolicy::new().with_selector(|_, _| LoadMode::Custom("extract".into()));
    policy.register_handler(
        "extract",
        ExtractHandler::new(destination.to_path_buf()),
        ConflictPolicy::Reject,
    )?;

    let reader = ContainerReader::new(Arc::new(TypeRegistry::with_builtins()))
        .with_options(config.reader.clone());
    let catalog = reader.read_with_progress(file, &mut policy, &|progress: &ContainerProgress| {
        if let Some(id) = &progress.current_item {
            tracing::debug!("[{}] {}", progress.phase.as_str(), id);
        }
    })?;

    println!(
        "✓ Extracted {} items to {}",
        catalog.items.len(),
        destination.display()
    );
    Ok(())
}
