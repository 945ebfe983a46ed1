//! SPDX-FileCopyrightText: 2025 CyberDeco
//!
//! SPDX-License-Identifier: MIT
//!
//! Container reader: header validation, region windows, streaming manifest
//! parse and per-item resolution/verification

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;

use super::{
    Catalog, ContainerHeader, ContainerPhase, ContainerProgress, HEADER_SIZE, ManifestHead,
    ManifestItem, ProgressCallback, Region, RegionReader, StorageMode,
};
use crate::config::ReaderOptions;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::loading::LoadPolicy;
use crate::manifest::{InlinePayload, ManifestReader};
use crate::registry::TypeRegistry;

/// Types that can Read and Seek
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where an item's resolved bytes physically live
#[derive(Debug)]
pub enum SourceBacking {
    /// Absolute byte range inside the container file
    Container { start: u64, length: u64 },
    /// A whole external file
    External(PathBuf),
    /// Inline payload spilled to a temporary file (deleted on drop)
    Spilled(TempPath),
    /// No bytes: absent payload or tolerated missing `Outside` file
    Empty,
}

/// Resolved byte source for one item, handed to a load handler
pub struct ItemSource {
    reader: Box<dyn ReadSeek>,
    length: u64,
    backing: SourceBacking,
}

impl ItemSource {
    pub fn new(reader: Box<dyn ReadSeek>, length: u64, backing: SourceBacking) -> Self {
        Self {
            reader,
            length,
            backing,
        }
    }

    /// Zero-length source
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Box::new(Cursor::new(Vec::new())), 0, SourceBacking::Empty)
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn backing(&self) -> &SourceBacking {
        &self.backing
    }

    /// Rewind to the first byte
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Split into the open reader, length and backing.
    ///
    /// Dropping the reader closes its file handle.
    pub fn into_parts(self) -> (Box<dyn ReadSeek>, u64, SourceBacking) {
        (self.reader, self.length, self.backing)
    }
}

impl Read for ItemSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemSource")
            .field("length", &self.length)
            .field("backing", &self.backing)
            .finish_non_exhaustive()
    }
}

/// Reads containers into catalogs
pub struct ContainerReader {
    registry: Arc<TypeRegistry>,
    options: ReaderOptions,
}

impl ContainerReader {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            options: ReaderOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Decode and validate only the fixed header
    pub fn read_header(path: impl AsRef<Path>) -> Result<ContainerHeader> {
        let mut file = File::open(path.as_ref())?;
        let header = ContainerHeader::read_from(&mut file)?;
        let file_len = file.metadata()?.len();
        check_regions(&header, file_len)?;
        Ok(header)
    }

    /// Decode the header and the head record without touching any item
    pub fn read_head(path: impl AsRef<Path>) -> Result<(ContainerHeader, ManifestHead)> {
        let path = absolute(path.as_ref())?;
        let header = Self::read_header(&path)?;
        let window = RegionReader::open(
            &path,
            u64::from(header.manifest_offset),
            u64::from(header.manifest_length),
        )?;
        let mut manifest = ManifestReader::new(BufReader::new(window));
        let mut head = manifest.read_head()?;
        head.file_path = Some(path);
        Ok((header, head))
    }

    /// Read a container, materializing items according to `policy`
    pub fn read(&self, path: impl AsRef<Path>, policy: &mut LoadPolicy) -> Result<Catalog> {
        self.read_with_progress(path, policy, &|_| {})
    }

    /// Read a container with progress callbacks
    ///
    /// # Errors
    /// Format errors (checksum, magic, region bounds) abort before any item
    /// is touched. Integrity and resolution errors abort the whole read and
    /// are wrapped in [`Error::Item`] naming the offending item. A region
    /// hash mismatch is reported as [`Error::RegionHashMismatch`] only when
    /// no item check caught the damage first. The policy's `on_failure`
    /// hooks run before the error is returned.
    pub fn read_with_progress(
        &self,
        path: impl AsRef<Path>,
        policy: &mut LoadPolicy,
        progress: ProgressCallback,
    ) -> Result<Catalog> {
        let path = absolute(path.as_ref())?;

        progress(&ContainerProgress::new(ContainerPhase::ReadingHeader, 0, 1));
        let header = Self::read_header(&path)?;
        tracing::debug!(
            "Container {} v{} tag {:#010x}: manifest {}+{}, data {}+{}",
            path.display(),
            header.version,
            header.app_tag,
            header.manifest_offset,
            header.manifest_length,
            header.data_offset,
            header.data_length
        );

        progress(&ContainerProgress::new(ContainerPhase::VerifyingRegions, 0, 2));
        let region_mismatch = self.region_mismatch(&path, &header)?;
        if let Some(mismatch) = &region_mismatch {
            tracing::warn!("{}; checking items before failing", mismatch);
        }

        let window = RegionReader::open(
            &path,
            u64::from(header.manifest_offset),
            u64::from(header.manifest_length),
        )?;
        let mut manifest = ManifestReader::new(BufReader::new(window));
        let mut head = match manifest.read_head() {
            Ok(head) => head,
            Err(err) => return Err(region_mismatch.unwrap_or(err)),
        };
        head.file_path = Some(path.clone());

        policy.before_items(&head);

        let mut catalog = Catalog::new(head);
        let outcome = self.read_items(&path, &header, &mut manifest, &mut catalog, policy, progress);
        // Item-level failures take precedence over a region mismatch
        let outcome = match (outcome, region_mismatch) {
            (Err(err), _) if err.item_id().is_some() => Err(err),
            (_, Some(mismatch)) => Err(mismatch),
            (outcome, None) => outcome,
        };

        match outcome {
            Ok(()) => {
                policy.after_items();
                progress(&ContainerProgress::new(
                    ContainerPhase::Complete,
                    catalog.items.len(),
                    catalog.items.len(),
                ));
                tracing::info!(
                    "Read {} items from {}",
                    catalog.items.len(),
                    path.display()
                );
                Ok(catalog)
            }
            Err(err) => {
                tracing::debug!("Read of {} failed: {}", path.display(), err.trail());
                policy.on_failure(&err);
                Err(err)
            }
        }
    }

    /// Hash the regions the options ask for. A mismatch is returned rather
    /// than raised so the item pass can attribute it first.
    fn region_mismatch(&self, path: &Path, header: &ContainerHeader) -> Result<Option<Error>> {
        if self.options.verify_manifest_region
            && let Some(mismatch) = verify_region(
                path,
                Region::Manifest,
                u64::from(header.manifest_offset),
                u64::from(header.manifest_length),
                header.manifest_hash,
            )?
        {
            return Ok(Some(mismatch));
        }
        if self.options.verify_data_region {
            return verify_region(
                path,
                Region::Data,
                header.data_offset,
                header.data_length,
                header.data_hash,
            );
        }
        Ok(None)
    }

    fn read_items<R: io::BufRead>(
        &self,
        path: &Path,
        header: &ContainerHeader,
        manifest: &mut ManifestReader<R>,
        catalog: &mut Catalog,
        policy: &mut LoadPolicy,
        progress: ProgressCallback,
    ) -> Result<()> {
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        while let Some(parsed) = manifest.next_item()? {
            let mut item = parsed.item;
            let current = catalog.items.len() + 1;
            progress(&ContainerProgress::with_item(
                ContainerPhase::LoadingItems,
                current,
                0,
                &item.asset_id,
            ));

            let asset = self
                .load_item(path, &base_dir, header, &item, parsed.inline, policy)
                .map_err(|err| Error::for_item(&item.asset_id, err))?;
            item.asset = Some(asset);
            catalog.items.push(item);
        }
        Ok(())
    }

    fn load_item(
        &self,
        path: &Path,
        base_dir: &Path,
        header: &ContainerHeader,
        item: &ManifestItem,
        inline: Option<InlinePayload>,
        policy: &mut LoadPolicy,
    ) -> Result<crate::asset::AssetRef> {
        let mut source = resolve_source(path, base_dir, header, item, inline)?;

        if let Some(expected) = item.hash {
            if let SourceBacking::Empty = source.backing()
                && item.storage == StorageMode::Outside
            {
                let missing = outside_path(base_dir, item)?;
                return Err(Error::OutsideFileMissing { path: missing });
            }

            let (actual, _) = ContentHash::of_reader(&mut source)?;
            if actual != expected {
                return Err(Error::ContentHashMismatch {
                    expected: expected.to_hex(),
                    actual: actual.to_hex(),
                });
            }
            source.rewind()?;
        }

        tracing::debug!(
            "Item '{}' ({}, {}): {} bytes",
            item.asset_id,
            item.type_name,
            item.storage,
            source.len()
        );
        policy.handle(item, source, &self.registry)
    }
}

/// Resolve an item's bytes according to its storage mode
fn resolve_source(
    path: &Path,
    base_dir: &Path,
    header: &ContainerHeader,
    item: &ManifestItem,
    inline: Option<InlinePayload>,
) -> Result<ItemSource> {
    match item.storage {
        StorageMode::InManifest => match inline {
            Some(payload) if payload.length > 0 => {
                let file = payload.file.reopen()?;
                let temp_path = payload.file.into_temp_path();
                Ok(ItemSource::new(
                    Box::new(file),
                    payload.length,
                    SourceBacking::Spilled(temp_path),
                ))
            }
            _ => Ok(ItemSource::empty()),
        },
        StorageMode::ManifestData => {
            let range = item.location.ok_or_else(|| {
                Error::MalformedManifest("ManifestData item has no location".to_string())
            })?;
            if range.start.checked_add(range.length).is_none_or(|end| end > header.data_length) {
                return Err(Error::ItemOutOfBounds {
                    start: range.start,
                    length: range.length,
                    region_len: header.data_length,
                });
            }
            let start = header.data_offset + range.start;
            let window = RegionReader::open(path, start, range.length)?;
            Ok(ItemSource::new(
                Box::new(window),
                range.length,
                SourceBacking::Container {
                    start,
                    length: range.length,
                },
            ))
        }
        StorageMode::Outside => {
            let external = outside_path(base_dir, item)?;
            match File::open(&external) {
                Ok(file) => {
                    let length = file.metadata()?.len();
                    Ok(ItemSource::new(
                        Box::new(file),
                        length,
                        SourceBacking::External(external),
                    ))
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(
                        "Outside file for '{}' not found: {}",
                        item.asset_id,
                        external.display()
                    );
                    Ok(ItemSource::empty())
                }
                Err(err) => Err(err.into()),
            }
        }
    }
}

/// Absolute path of an `Outside` item's file
pub(crate) fn outside_path(base_dir: &Path, item: &ManifestItem) -> Result<PathBuf> {
    let relative = item.outside_path.as_deref().ok_or_else(|| {
        Error::InvalidPath(format!("Outside item '{}' has no path", item.asset_id))
    })?;
    Ok(base_dir.join(validate_relative(relative)?))
}

/// Reject absolute paths and `..` components
pub(crate) fn validate_relative(relative: &str) -> Result<&Path> {
    let path = Path::new(relative);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if relative.is_empty() || escapes {
        return Err(Error::InvalidPath(relative.to_string()));
    }
    Ok(path)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

fn check_regions(header: &ContainerHeader, file_len: u64) -> Result<()> {
    let manifest_end = header.manifest_end();
    if u64::from(header.manifest_offset) < HEADER_SIZE as u64 || manifest_end > file_len {
        return Err(Error::RegionOutOfBounds {
            region: Region::Manifest,
            offset: u64::from(header.manifest_offset),
            length: u64::from(header.manifest_length),
            file_len,
        });
    }
    if header.data_offset < HEADER_SIZE as u64
        || header.data_offset.checked_add(header.data_length).is_none()
        || header.data_end() > file_len
    {
        return Err(Error::RegionOutOfBounds {
            region: Region::Data,
            offset: header.data_offset,
            length: header.data_length,
            file_len,
        });
    }
    if header.data_offset < manifest_end {
        return Err(Error::RegionsOverlap {
            manifest_end,
            data_offset: header.data_offset,
        });
    }
    Ok(())
}

fn verify_region(
    path: &Path,
    region: Region,
    offset: u64,
    length: u64,
    expected: ContentHash,
) -> Result<Option<Error>> {
    let mut window = RegionReader::open(path, offset, length)?;
    let (actual, _) = ContentHash::of_reader(&mut window)?;
    if actual == expected {
        return Ok(None);
    }
    Ok(Some(Error::RegionHashMismatch {
        region,
        expected: expected.to_hex(),
        actual: actual.to_hex(),
    }))
}
