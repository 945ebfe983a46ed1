//! SPDX-FileCopyrightText: 2025 CyberDeco
//!
//! SPDX-License-Identifier: MIT
//!
//! Load policy: how each item is materialized on read.
//!
//! A selector picks a [`LoadMode`] per item from its metadata and resolved
//! byte length. `ToObject` decodes immediately, `LazyAsset` hands back a
//! deferred proxy, and `Custom(key)` dispatches to a handler registered
//! under `key`.

mod lazy;
mod side_file;

use std::path::PathBuf;

use indexmap::IndexMap;

pub use lazy::{LazyAsset, LazyEvent, LazySource};
pub use side_file::SideFileHandler;

use crate::asset::AssetRef;
use crate::container::{ItemSource, ManifestHead, ManifestItem, SourceBacking};
use crate::error::{Error, Result};
use crate::registry::{ConflictPolicy, TypeRegistry};

/// How one item is materialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadMode {
    /// Decode into an asset right away
    ToObject,
    /// Return a proxy that decodes on first access
    LazyAsset,
    /// Dispatch to the custom handler registered under this key
    Custom(String),
}

/// Picks a load mode from item metadata and resolved byte length
pub type LoadSelector = Box<dyn Fn(&ManifestItem, u64) -> LoadMode + Send + Sync>;

/// Materializes item bytes into asset references.
///
/// `before_items` and `after_items` bracket a successful pass over the
/// items. On any failure `on_failure` runs instead of `after_items`.
pub trait LoadHandler: Send {
    fn before_items(&mut self, _head: &ManifestHead) -> Result<()> {
        Ok(())
    }

    fn handle(
        &mut self,
        item: &ManifestItem,
        source: ItemSource,
        registry: &TypeRegistry,
    ) -> Result<AssetRef>;

    fn after_items(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_failure(&mut self, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Decodes immediately
#[derive(Debug, Default)]
pub struct EagerHandler;

impl LoadHandler for EagerHandler {
    fn handle(
        &mut self,
        item: &ManifestItem,
        mut source: ItemSource,
        registry: &TypeRegistry,
    ) -> Result<AssetRef> {
        let info = registry.resolve(&item.type_name)?;
        let length = source.len();
        let asset = info.decode(&item.asset_id, &mut source, length)?;
        Ok(AssetRef::ready(asset))
    }
}

/// Defers decoding behind a [`LazyAsset`].
///
/// The type is resolved now so unknown types still fail the read. The open
/// handle is dropped; the proxy reopens its bytes on each load.
#[derive(Debug, Default)]
pub struct LazyHandler {
    container: Option<PathBuf>,
}

impl LoadHandler for LazyHandler {
    fn before_items(&mut self, head: &ManifestHead) -> Result<()> {
        self.container.clone_from(&head.file_path);
        Ok(())
    }

    fn handle(
        &mut self,
        item: &ManifestItem,
        source: ItemSource,
        registry: &TypeRegistry,
    ) -> Result<AssetRef> {
        let info = registry.resolve(&item.type_name)?;
        let (_, length, backing) = source.into_parts();
        let lazy_source = match backing {
            SourceBacking::Container { start, length } => {
                let path = self.container.clone().ok_or_else(|| {
                    Error::InvalidPath("container path unknown to lazy handler".to_string())
                })?;
                LazySource::Range {
                    path,
                    start,
                    length,
                }
            }
            SourceBacking::External(path) => LazySource::file(path, length),
            SourceBacking::Spilled(file) => LazySource::Spilled {
                file: std::sync::Arc::new(file),
                length,
            },
            SourceBacking::Empty => LazySource::Empty,
        };
        Ok(AssetRef::Lazy(std::sync::Arc::new(LazyAsset::new(
            &item.asset_id,
            info,
            lazy_source,
        ))))
    }
}

/// Selector plus the handlers it can dispatch to
pub struct LoadPolicy {
    selector: LoadSelector,
    eager: EagerHandler,
    lazy: LazyHandler,
    custom: IndexMap<String, Box<dyn LoadHandler>>,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadPolicy {
    /// Decode everything eagerly
    #[must_use]
    pub fn new() -> Self {
        Self {
            selector: Box::new(|_, _| LoadMode::ToObject),
            eager: EagerHandler,
            lazy: LazyHandler::default(),
            custom: IndexMap::new(),
        }
    }

    /// Defer every item
    #[must_use]
    pub fn lazy() -> Self {
        Self::new().with_selector(|_, _| LoadMode::LazyAsset)
    }

    /// Defer items larger than `threshold` bytes, decode the rest
    #[must_use]
    pub fn lazy_above(threshold: u64) -> Self {
        Self::new().with_selector(move |_, length| {
            if length > threshold {
                LoadMode::LazyAsset
            } else {
                LoadMode::ToObject
            }
        })
    }

    #[must_use]
    pub fn with_selector(
        mut self,
        selector: impl Fn(&ManifestItem, u64) -> LoadMode + Send + Sync + 'static,
    ) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Register a custom handler under `key`
    pub fn register_handler(
        &mut self,
        key: impl Into<String>,
        handler: impl LoadHandler + 'static,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        let handler: Box<dyn LoadHandler> = Box::new(handler);
        policy.insert(&mut self.custom, "load handler", key.into(), handler)
    }

    pub fn handler_keys(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    pub fn select(&self, item: &ManifestItem, length: u64) -> LoadMode {
        (self.selector)(item, length)
    }

    pub(crate) fn handle(
        &mut self,
        item: &ManifestItem,
        source: ItemSource,
        registry: &TypeRegistry,
    ) -> Result<AssetRef> {
        match self.select(item, source.len()) {
            LoadMode::ToObject => self.eager.handle(item, source, registry),
            LoadMode::LazyAsset => self.lazy.handle(item, source, registry),
            LoadMode::Custom(key) => match self.custom.get_mut(&key) {
                Some(handler) => handler.handle(item, source, registry),
                None => Err(Error::UnknownLoadHandler(key)),
            },
        }
    }

    /// Best effort: failures are logged, not propagated
    pub(crate) fn before_items(&mut self, head: &ManifestHead) {
        for (name, handler) in self.handlers_mut() {
            if let Err(e) = handler.before_items(head) {
                tracing::warn!("Load handler '{}' before-items hook failed: {}", name, e);
            }
        }
    }

    /// Best effort: failures are logged, not propagated
    pub(crate) fn after_items(&mut self) {
        for (name, handler) in self.handlers_mut() {
            if let Err(e) = handler.after_items() {
                tracing::warn!("Load handler '{}' after-items hook failed: {}", name, e);
            }
        }
    }

    /// Runs every handler's failure hook; the read error is what propagates
    pub(crate) fn on_failure(&mut self, error: &Error) {
        for (name, handler) in self.handlers_mut() {
            if let Err(e) = handler.on_failure(error) {
                tracing::error!("Load handler '{}' failure hook failed: {}", name, e);
            }
        }
    }

    fn handlers_mut(&mut self) -> impl Iterator<Item = (&str, &mut dyn LoadHandler)> {
        let builtin: [(&str, &mut dyn LoadHandler); 2] =
            [("eager", &mut self.eager), ("lazy", &mut self.lazy)];
        builtin.into_iter().chain(
            self.custom
                .iter_mut()
                .map(|(k, h)| (k.as_str(), h.as_mut() as &mut dyn LoadHandler)),
        )
    }
}

impl std::fmt::Debug for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadPolicy")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetBody;
    use crate::container::StorageMode;
    use std::io::Cursor;

    fn text_source(bytes: &[u8]) -> ItemSource {
        ItemSource::new(
            Box::new(Cursor::new(bytes.to_vec())),
            bytes.len() as u64,
            SourceBacking::Empty,
        )
    }

    struct Constant;

    impl LoadHandler for Constant {
        fn handle(
            &mut self,
            item: &ManifestItem,
            _source: ItemSource,
            _registry: &TypeRegistry,
        ) -> Result<AssetRef> {
            Ok(AssetRef::ready(crate::asset::Asset::text(&item.asset_id, "constant")))
        }
    }

    #[test]
    fn test_default_policy_is_eager() {
        let registry = TypeRegistry::with_builtins();
        let mut policy = LoadPolicy::default();
        let item = ManifestItem::new("a", "text", StorageMode::InManifest);
        let asset = policy.handle(&item, text_source(b"hi"), &registry).unwrap();
        assert!(matches!(asset, AssetRef::Ready(_)));
        assert_eq!(asset.get().unwrap().body, AssetBody::Text("hi".into()));
    }

    #[test]
    fn test_lazy_above_threshold() {
        let policy = LoadPolicy::lazy_above(10);
        let item = ManifestItem::new("a", "text", StorageMode::InManifest);
        assert_eq!(policy.select(&item, 10), LoadMode::ToObject);
        assert_eq!(policy.select(&item, 11), LoadMode::LazyAsset);
    }

    #[test]
    fn test_custom_handler_dispatch() {
        let registry = TypeRegistry::with_builtins();
        let mut policy = LoadPolicy::new().with_selector(|item, _| {
            if item.type_name == "text" {
                LoadMode::Custom("const".into())
            } else {
                LoadMode::ToObject
            }
        });
        policy
            .register_handler("const", Constant, ConflictPolicy::Reject)
            .unwrap();
        assert!(policy
            .register_handler("const", Constant, ConflictPolicy::Reject)
            .is_err());
        assert!(!policy
            .register_handler("const", Constant, ConflictPolicy::Ignore)
            .unwrap());

        let item = ManifestItem::new("a", "text", StorageMode::InManifest);
        let asset = policy.handle(&item, text_source(b"hi"), &registry).unwrap();
        assert_eq!(asset.get().unwrap().body, AssetBody::Text("constant".into()));
    }

    #[test]
    fn test_unknown_custom_key() {
        let registry = TypeRegistry::with_builtins();
        let mut policy = LoadPolicy::new().with_selector(|_, _| LoadMode::Custom("nope".into()));
        let item = ManifestItem::new("a", "text", StorageMode::InManifest);
        assert!(matches!(
            policy.handle(&item, text_source(b"hi"), &registry),
            Err(Error::UnknownLoadHandler(key)) if key == "nope"
        ));
    }

    #[test]
    fn test_lazy_handler_needs_resolvable_type() {
        let registry = TypeRegistry::with_builtins();
        let mut policy = LoadPolicy::lazy();
        let item = ManifestItem::new("a", "mesh", StorageMode::InManifest);
        assert!(matches!(
            policy.handle(&item, text_source(b"hi"), &registry),
            Err(Error::UnknownAssetType(_))
        ));
    }
}
