//! SPDX-FileCopyrightText: 2025 CyberDeco
//!
//! SPDX-License-Identifier: MIT
//!
//! Container writer with progress callbacks
//!
//! Items are staged into temporary files next to the target: `ManifestData`
//! bytes into a bulk area, `InManifest` bytes into an inline area that the
//! manifest writer folds back in as payload chunks. The final file is
//! assembled in a temporary file too and only renamed over the target once
//! every step has succeeded. Materialized `Outside` files are staged the
//! same way and moved into place after the container itself.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tempfile::NamedTempFile;

use super::reader::validate_relative;
use super::{
    ByteRange, Catalog, ContainerHeader, ContainerPhase, ContainerProgress, HEADER_SIZE,
    HashPolicy, ManifestItem, ProgressCallback, Region, RegionReader, StorageMode,
};
use crate::config::WriterOptions;
use crate::error::{Error, Result};
use crate::hash::{ContentHash, HashingWriter};
use crate::manifest::ManifestWriter;
use crate::registry::TypeRegistry;

/// Result of a successful write
#[derive(Debug, Clone)]
pub struct WriteSummary {
    /// Absolute path of the written container
    pub path: PathBuf,
    pub header: ContainerHeader,
    pub item_count: usize,
    /// Total raw bytes embedded as inline payloads
    pub inline_bytes: u64,
    /// `Outside` items whose file was written next to the container
    pub materialized: Vec<PathBuf>,
}

/// Materialized `Outside` bytes waiting for the container to be committed
struct PendingFile {
    temp: NamedTempFile,
    target: PathBuf,
}

/// Per-item staging outcome
#[derive(Debug, Clone, Copy, Default)]
struct Staged {
    /// Location in the bulk area (`ManifestData`) or inline area (`InManifest`)
    range: Option<ByteRange>,
    hash: Option<ContentHash>,
}

/// Writes catalogs into container files
pub struct ContainerWriter {
    registry: Arc<TypeRegistry>,
    options: WriterOptions,
}

impl ContainerWriter {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            options: WriterOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Write `catalog` to `output_path`
    pub fn create(&self, catalog: &mut Catalog, output_path: impl AsRef<Path>) -> Result<WriteSummary> {
        self.create_with_progress(catalog, output_path, &|_| {})
    }

    /// Write `catalog` to `output_path` with progress callbacks.
    ///
    /// On success the catalog's items carry their written hashes and
    /// locations (`None` for `InManifest` and `Outside`).
    ///
    /// # Errors
    /// Any failing item aborts the write with an [`Error::Item`] naming it;
    /// nothing is left at `output_path` in that case.
    pub fn create_with_progress(
        &self,
        catalog: &mut Catalog,
        output_path: impl AsRef<Path>,
        progress: ProgressCallback,
    ) -> Result<WriteSummary> {
        let mut options = self.options.clone();
        options.validate()?;

        let output_path = std::path::absolute(output_path.as_ref())?;
        let out_dir = output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        fs::create_dir_all(&out_dir)?;

        let items = dedup_items(&catalog.items, options.duplicate_ids)?;
        let total = items.len();

        // Stage item bytes
        let mut bulk = HashingWriter::new(BufWriter::new(NamedTempFile::new_in(&out_dir)?));
        let mut inline = BufWriter::new(NamedTempFile::new_in(&out_dir)?);
        let mut inline_len = 0u64;
        let mut staged = Vec::with_capacity(total);
        let mut pending = Vec::new();

        for (i, item) in items.iter().enumerate() {
            progress(&ContainerProgress::with_item(
                ContainerPhase::StagingItems,
                i + 1,
                total,
                &item.asset_id,
            ));

            let result = match item.storage {
                StorageMode::ManifestData => {
                    let start = bulk.written();
                    self.stage_item(item, &mut bulk, start, &options)
                }
                StorageMode::InManifest => {
                    let result = self.stage_item(item, &mut inline, inline_len, &options);
                    if let Ok(Staged { range: Some(range), .. }) = &result {
                        inline_len = range.end();
                    }
                    result
                }
                StorageMode::Outside => {
                    self.stage_outside(item, &out_dir, &options, &mut pending)
                }
            };
            staged.push(result.map_err(|err| Error::for_item(&item.asset_id, err))?);
        }

        let (bulk, data_hash, data_length) = bulk.finish();
        let bulk = bulk.into_inner().map_err(io::IntoInnerError::into_error)?;
        let mut inline = inline.into_inner().map_err(io::IntoInnerError::into_error)?;

        // Emit the manifest
        progress(&ContainerProgress::new(ContainerPhase::WritingManifest, 0, total));
        let written_items: Vec<ManifestItem> = items
            .iter()
            .zip(&staged)
            .map(|(item, staged)| written_item(item, staged))
            .collect();

        let manifest_file = NamedTempFile::new_in(&out_dir)?;
        let mut manifest = ManifestWriter::new(
            HashingWriter::new(BufWriter::new(manifest_file)),
            options.chunk_size,
        );
        manifest.write_head(&catalog.head, total)?;
        for (i, (item, staged)) in written_items.iter().zip(&staged).enumerate() {
            progress(&ContainerProgress::with_item(
                ContainerPhase::WritingManifest,
                i + 1,
                total,
                &item.asset_id,
            ));
            let result = match (item.storage, staged.range) {
                (StorageMode::InManifest, Some(range)) => {
                    let mut payload =
                        RegionReader::new(inline.as_file_mut(), range.start, range.length)?;
                    let source: &mut dyn Read = &mut payload;
                    manifest.write_item(item, Some((source, range.length)))
                }
                _ => manifest.write_item(item, None),
            };
            result.map_err(|err| Error::for_item(&item.asset_id, err))?;
        }
        let (manifest_file, manifest_hash, manifest_len) = manifest.finish()?.finish();
        let manifest_file = manifest_file
            .into_inner()
            .map_err(io::IntoInnerError::into_error)?;
        drop(inline);

        let manifest_length = u32::try_from(manifest_len).map_err(|_| Error::RegionTooLarge {
            region: Region::Manifest,
            size: manifest_len,
        })?;
        let manifest_offset = HEADER_SIZE as u32;

        // Assemble header + manifest + data
        progress(&ContainerProgress::new(ContainerPhase::Assembling, total, total));
        let header = ContainerHeader {
            version: options.format_version,
            app_tag: options.app_tag,
            manifest_offset,
            manifest_length,
            manifest_hash,
            data_offset: u64::from(manifest_offset) + manifest_len,
            data_length,
            data_hash,
        };

        let mut output = BufWriter::new(NamedTempFile::new_in(&out_dir)?);
        output.write_all(&header.encode())?;
        copy_staged(manifest_file, &mut output)?;
        copy_staged(bulk, &mut output)?;
        let output = output.into_inner().map_err(io::IntoInnerError::into_error)?;
        output.as_file().sync_all()?;
        output
            .persist(&output_path)
            .map_err(|e| Error::Io(e.error))?;

        let materialized = commit_pending(pending)?;

        // The caller's catalog now mirrors what was written
        catalog.items = written_items;
        catalog.head.file_path = Some(output_path.clone());

        progress(&ContainerProgress::new(ContainerPhase::Complete, total, total));
        tracing::info!(
            "Wrote {} items to {} (manifest {} bytes, data {} bytes)",
            total,
            output_path.display(),
            manifest_length,
            data_length
        );

        Ok(WriteSummary {
            path: output_path,
            header,
            item_count: total,
            inline_bytes: inline_len,
            materialized,
        })
    }

    /// Serialize one item into a staging area starting at `start`
    fn stage_item<W: Write>(
        &self,
        item: &ManifestItem,
        area: &mut W,
        start: u64,
        options: &WriterOptions,
    ) -> Result<Staged> {
        let asset = item.asset.as_ref().ok_or(Error::MissingAsset)?.get()?;
        let info = self.registry.resolve(&item.type_name)?;

        let mut hashing = HashingWriter::new(area);
        info.encode(&asset, &mut hashing)?;
        let (_, computed, length) = hashing.finish();

        Ok(Staged {
            range: Some(ByteRange::new(start, length)),
            hash: effective_hash(item.hash_policy, options, || Ok(Some(computed)))?,
        })
    }

    /// Stage or hash the external file of an `Outside` item
    fn stage_outside(
        &self,
        item: &ManifestItem,
        out_dir: &Path,
        options: &WriterOptions,
        pending: &mut Vec<PendingFile>,
    ) -> Result<Staged> {
        let relative = item.outside_path.as_deref().ok_or_else(|| {
            Error::InvalidPath(format!("Outside item '{}' has no path", item.asset_id))
        })?;
        let target = out_dir.join(validate_relative(relative)?);

        if options.materialize_outside
            && let Some(asset) = &item.asset
        {
            let asset = asset.get()?;
            let info = self.registry.resolve(&item.type_name)?;
            let mut hashing = HashingWriter::new(BufWriter::new(NamedTempFile::new_in(out_dir)?));
            info.encode(&asset, &mut hashing)?;
            let (file, computed, length) = hashing.finish();
            let temp = file.into_inner().map_err(io::IntoInnerError::into_error)?;
            temp.as_file().sync_all()?;
            tracing::debug!(
                "Staged '{}' for {} ({} bytes)",
                item.asset_id,
                target.display(),
                length
            );
            pending.push(PendingFile { temp, target });
            return Ok(Staged {
                range: None,
                hash: effective_hash(item.hash_policy, options, || Ok(Some(computed)))?,
            });
        }

        let hash = effective_hash(item.hash_policy, options, || match File::open(&target) {
            Ok(mut file) => Ok(Some(ContentHash::of_reader(&mut file)?.0)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Outside file for '{}' not found, writing without hash: {}",
                    item.asset_id,
                    target.display()
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        })?;
        Ok(Staged { range: None, hash })
    }
}

/// Move staged `Outside` files to their targets
fn commit_pending(pending: Vec<PendingFile>) -> Result<Vec<PathBuf>> {
    let mut materialized = Vec::with_capacity(pending.len());
    for PendingFile { temp, target } in pending {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&target).map_err(|e| Error::Io(e.error))?;
        tracing::debug!("Materialized {}", target.display());
        materialized.push(target);
    }
    Ok(materialized)
}

/// Apply the item's hash policy; `compute` only runs when a computed hash is wanted
fn effective_hash(
    policy: HashPolicy,
    options: &WriterOptions,
    compute: impl FnOnce() -> Result<Option<ContentHash>>,
) -> Result<Option<ContentHash>> {
    match policy {
        HashPolicy::Fixed(hash) => Ok(Some(hash)),
        HashPolicy::Skip => Ok(None),
        HashPolicy::Compute if !options.hash_items => Ok(None),
        HashPolicy::Compute => compute(),
    }
}

/// The item as persisted: inline and outside items carry no location
fn written_item(item: &ManifestItem, staged: &Staged) -> ManifestItem {
    let mut written = item.clone();
    written.hash = staged.hash;
    written.location = match item.storage {
        StorageMode::ManifestData => staged.range,
        StorageMode::InManifest | StorageMode::Outside => None,
    };
    if item.storage != StorageMode::Outside {
        written.outside_path = None;
    }
    written
}

/// Resolve asset id collisions, keeping first-seen order
fn dedup_items(
    items: &[ManifestItem],
    policy: crate::registry::ConflictPolicy,
) -> Result<Vec<ManifestItem>> {
    let mut unique: IndexMap<String, ManifestItem> = IndexMap::with_capacity(items.len());
    for item in items {
        policy.insert(&mut unique, "asset id", item.asset_id.clone(), item.clone())?;
    }
    Ok(unique.into_values().collect())
}

fn copy_staged<W: Write>(staged: NamedTempFile, out: &mut W) -> Result<()> {
    let mut file = staged.into_file();
    file.seek(SeekFrom::Start(0))?;
    io::copy(&mut file, out)?;
    Ok(())
}
