//! Side-file load handler
//!
//! Copies each item's bytes into one side file next to the caller's choice
//! of path and hands back lazy proxies over it, so the container can be
//! moved or deleted while the assets stay loadable.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LazyAsset, LazySource, LoadHandler};
use crate::asset::AssetRef;
use crate::container::{ByteRange, ItemSource, ManifestHead, ManifestItem};
use crate::error::{Error, Result};
use crate::registry::TypeRegistry;

pub struct SideFileHandler {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    offset: u64,
    entries: Vec<(String, ByteRange)>,
}

impl SideFileHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
            offset: 0,
            entries: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Item ids and their byte ranges inside the side file
    pub fn entries(&self) -> &[(String, ByteRange)] {
        &self.entries
    }
}

impl LoadHandler for SideFileHandler {
    fn before_items(&mut self, head: &ManifestHead) -> Result<()> {
        tracing::debug!(
            "Side file for {} at {}",
            head.key,
            self.path.display()
        );
        self.out = Some(BufWriter::new(File::create(&self.path)?));
        self.offset = 0;
        self.entries.clear();
        Ok(())
    }

    fn handle(
        &mut self,
        item: &ManifestItem,
        mut source: ItemSource,
        registry: &TypeRegistry,
    ) -> Result<AssetRef> {
        let info = registry.resolve(&item.type_name)?;
        if self.out.is_none() {
            // Setup failed or was never run
            self.out = Some(BufWriter::new(File::create(&self.path)?));
        }
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| Error::InvalidPath(self.path.display().to_string()))?;

        let copied = io::copy(&mut source, out)?;
        if copied != source.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, copied {copied}", source.len()),
            )));
        }
        // Proxies reopen the file, so their bytes must be on disk
        out.flush()?;

        let range = ByteRange::new(self.offset, copied);
        self.offset += copied;
        self.entries.push((item.asset_id.clone(), range));

        let lazy_source = LazySource::Range {
            path: self.path.clone(),
            start: range.start,
            length: range.length,
        };
        Ok(AssetRef::Lazy(Arc::new(LazyAsset::new(
            &item.asset_id,
            info,
            lazy_source,
        ))))
    }

    fn after_items(&mut self) -> Result<()> {
        if let Some(out) = self.out.take() {
            let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_all()?;
        }
        tracing::debug!(
            "Side file {} holds {} items ({} bytes)",
            self.path.display(),
            self.entries.len(),
            self.offset
        );
        Ok(())
    }

    fn on_failure(&mut self, _error: &Error) -> Result<()> {
        self.out = None;
        self.entries.clear();
        self.offset = 0;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
