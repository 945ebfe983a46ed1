//! Types for asset container handling
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetRef};
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::registry::ConflictPolicy;

/// One of the two offset-addressed regions of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Manifest,
    Data,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Region::Manifest => "manifest",
            Region::Data => "data",
        })
    }
}

/// Where an item's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    /// Embedded inline in the manifest text
    InManifest,
    /// Byte range inside the container's data region
    ManifestData,
    /// Separate file referenced by a path relative to the container
    Outside,
}

impl StorageMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::InManifest => "InManifest",
            StorageMode::ManifestData => "ManifestData",
            StorageMode::Outside => "Outside",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "InManifest" => Ok(StorageMode::InManifest),
            "ManifestData" => Ok(StorageMode::ManifestData),
            "Outside" => Ok(StorageMode::Outside),
            other => Err(Error::MalformedManifest(format!(
                "unknown storage mode '{other}'"
            ))),
        }
    }
}

/// Region-relative byte range of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    #[must_use]
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Exclusive end offset
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Grouping namespace and id of a package
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackageKey {
    pub group: String,
    pub id: String,
}

impl PackageKey {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.id)
        } else {
            write!(f, "{}:{}", self.group, self.id)
        }
    }
}

/// Manifest head record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestHead {
    pub key: PackageKey,
    pub version: String,
    pub name: String,
    pub remark: String,
    pub created: DateTime<Utc>,
    /// Absolute path of the container this head was read from.
    ///
    /// Runtime only, never persisted. `Outside` items resolve against its
    /// parent directory.
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl ManifestHead {
    /// Create a head stamped with the current time
    pub fn new(
        key: PackageKey,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            key,
            version: version.into(),
            name: name.into(),
            remark: String::new(),
            created: Utc::now(),
            file_path: None,
        }
    }

    #[must_use]
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }
}

/// How the writer fills an item's content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashPolicy {
    /// Hash the staged bytes
    #[default]
    Compute,
    /// Leave the hash empty; readers skip verification
    Skip,
    /// Record this value regardless of the staged bytes
    Fixed(ContentHash),
}

/// One catalog entry
#[derive(Debug, Clone)]
pub struct ManifestItem {
    pub asset_id: String,
    /// Lookup key into the type registry
    pub type_name: String,
    pub storage: StorageMode,
    /// `None` means verification is skipped
    pub hash: Option<ContentHash>,
    /// Write-side hashing choice (not persisted)
    pub hash_policy: HashPolicy,
    /// `None` for `InManifest` and `Outside` items once written
    pub location: Option<ByteRange>,
    /// Path relative to the container's directory, `Outside` only
    pub outside_path: Option<String>,
    /// Live asset reference (not persisted)
    pub asset: Option<AssetRef>,
}

impl ManifestItem {
    pub fn new(
        asset_id: impl Into<String>,
        type_name: impl Into<String>,
        storage: StorageMode,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            type_name: type_name.into(),
            storage,
            hash: None,
            hash_policy: HashPolicy::Compute,
            location: None,
            outside_path: None,
            asset: None,
        }
    }

    /// Item carrying an asset, id and type name taken from the asset
    pub fn from_asset(asset: Asset, storage: StorageMode) -> Self {
        let mut item = Self::new(asset.id.clone(), asset.type_name.clone(), storage);
        item.asset = Some(AssetRef::ready(asset));
        item
    }

    /// `Outside` item pointing at a path relative to the container
    pub fn outside(
        asset_id: impl Into<String>,
        type_name: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        let mut item = Self::new(asset_id, type_name, StorageMode::Outside);
        item.outside_path = Some(relative_path.into());
        item
    }

    #[must_use]
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = Some(AssetRef::ready(asset));
        self
    }

    #[must_use]
    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }
}

/// Head plus ordered items
#[derive(Debug, Clone)]
pub struct Catalog {
    pub head: ManifestHead,
    pub items: Vec<ManifestItem>,
}

impl Catalog {
    #[must_use]
    pub fn new(head: ManifestHead) -> Self {
        Self {
            head,
            items: Vec::new(),
        }
    }

    /// Add an item, resolving an asset id collision with `policy`.
    ///
    /// Returns `true` if the item was stored.
    pub fn add_item(&mut self, item: ManifestItem, policy: ConflictPolicy) -> Result<bool> {
        match self.items.iter().position(|i| i.asset_id == item.asset_id) {
            None => {
                self.items.push(item);
                Ok(true)
            }
            Some(pos) => {
                let key = item.asset_id.clone();
                policy.resolve("asset id", &key, || self.items[pos] = item)
            }
        }
    }

    #[must_use]
    pub fn item(&self, asset_id: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|i| i.asset_id == asset_id)
    }
}

/// Progress information during container operations
#[derive(Debug, Clone)]
pub struct ContainerProgress {
    /// Current operation phase
    pub phase: ContainerPhase,
    /// Current item number (1-indexed)
    pub current: usize,
    /// Total number of items (0 if not yet known)
    pub total: usize,
    /// Item being processed (if applicable)
    pub current_item: Option<String>,
}

impl ContainerProgress {
    #[must_use]
    pub fn new(phase: ContainerPhase, current: usize, total: usize) -> Self {
        Self {
            phase,
            current,
            total,
            current_item: None,
        }
    }

    /// Create a progress update naming an item
    #[must_use]
    pub fn with_item(
        phase: ContainerPhase,
        current: usize,
        total: usize,
        item: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            current_item: Some(item.into()),
        }
    }

    /// Get the progress percentage (0.0 - 1.0)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.current as f32 / self.total as f32
        }
    }
}

/// Phase of a container operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    /// Serializing assets into staging areas
    StagingItems,
    /// Emitting manifest text
    WritingManifest,
    /// Writing header and regions to the output file
    Assembling,
    /// Reading and validating the header
    ReadingHeader,
    /// Verifying region hashes
    VerifyingRegions,
    /// Resolving, verifying and materializing items
    LoadingItems,
    /// Operation complete
    Complete,
}

impl ContainerPhase {
    /// Get a human-readable description of this phase
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StagingItems => "Staging items",
            Self::WritingManifest => "Writing manifest",
            Self::Assembling => "Assembling container",
            Self::ReadingHeader => "Reading header",
            Self::VerifyingRegions => "Verifying regions",
            Self::LoadingItems => "Loading items",
            Self::Complete => "Complete",
        }
    }
}
