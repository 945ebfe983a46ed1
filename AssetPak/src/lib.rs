//! # AssetPak
//!
//! A pure-Rust library for packaging typed assets into a single seekable
//! container file.
//!
//! ## Container Layout
//!
//! - **Header** - fixed 66 bytes, big-endian, guarded by a CRC-8
//! - **Manifest region** - XML catalog: head record plus ordered items,
//!   with `InManifest` payloads embedded as base64 chunks
//! - **Data region** - raw concatenated bytes of `ManifestData` items
//!
//! Items stored `Outside` live in separate files next to the container and
//! are referenced by relative path.
//!
//! ## Quick Start
//!
//! ```no_run
//! use assetpak::prelude::*;
//!
//! let head = ManifestHead::new(PackageKey::new("com.demo", "pack"), "demo", "1.0.0");
//! let mut catalog = Catalog::new(head);
//! catalog.add_item(
//!     ManifestItem::from_asset(Asset::text("readme", "hello"), StorageMode::ManifestData),
//!     ConflictPolicy::Reject,
//! )?;
//! ContainerOperations::create(&mut catalog, "demo.apak")?;
//!
//! let catalog = ContainerOperations::read("demo.apak")?;
//! let readme = catalog.item("readme").and_then(|i| i.asset.as_ref());
//! # Ok::<(), assetpak::Error>(())
//! ```
//!
//! ### Lazy Loading
//!
//! ```no_run
//! use std::sync::Arc;
//! use assetpak::prelude::*;
//!
//! let reader = ContainerReader::new(Arc::new(TypeRegistry::with_builtins()));
//! // Defer anything over 1 MiB
//! let mut policy = LoadPolicy::lazy_above(1 << 20);
//! let catalog = reader.read("demo.apak", &mut policy)?;
//! for item in &catalog.items {
//!     if let Some(AssetRef::Lazy(proxy)) = &item.asset {
//!         println!("{} deferred ({} bytes)", item.asset_id, proxy.source().len());
//!     }
//! }
//! # Ok::<(), assetpak::Error>(())
//! ```

pub mod asset;
pub mod config;
pub mod container;
pub mod error;
pub mod hash;
pub mod loading;
pub mod manifest;
pub mod registry;

// Re-exports for convenience
pub use error::{Error, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{Error, Result};

    pub use crate::asset::{Asset, AssetBody, AssetKind, AssetRef, ImageAsset, Record};
    pub use crate::config::{PackConfig, ReaderOptions, WriterOptions};

    // Container pipeline
    pub use crate::container::{
        Catalog, ContainerHeader, ContainerOperations, ContainerProgress, ContainerReader,
        ContainerWriter, HashPolicy, ManifestHead, ManifestItem, PackageKey, StorageMode,
        WriteSummary,
    };

    pub use crate::hash::ContentHash;
    pub use crate::loading::{LazyAsset, LazyEvent, LoadHandler, LoadMode, LoadPolicy, SideFileHandler};
    pub use crate::registry::{AssetSerializer, ConflictPolicy, TypeMapping, TypeRegistry};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
