//! High-level container operations
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::{
    Catalog, ContainerHeader, ContainerReader, ContainerWriter, ManifestHead, RegionReader,
    StorageMode, WriteSummary,
};
use crate::error::Result;
use crate::hash::ContentHash;
use crate::loading::LoadPolicy;
use crate::manifest::ManifestReader;
use crate::registry::TypeRegistry;

/// One item as listed from the manifest, without resolving its bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemListing {
    pub asset_id: String,
    pub type_name: String,
    pub storage: StorageMode,
    /// Byte length when the manifest records it (`ManifestData`, `InManifest`)
    pub length: Option<u64>,
    pub hash: Option<ContentHash>,
    pub outside_path: Option<String>,
}

/// Outcome of [`ContainerOperations::verify`]
#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub header: ContainerHeader,
    pub head: ManifestHead,
    pub item_count: usize,
    /// Items without a content hash, which were not checked
    pub unverified: Vec<String>,
}

/// Container operations with the built-in type registry and default options.
pub struct ContainerOperations;

impl ContainerOperations {
    /// Write a catalog to a container file
    ///
    /// # Errors
    /// Returns an error naming the failing item if any asset cannot be staged.
    pub fn create<P: AsRef<Path>>(catalog: &mut Catalog, output_path: P) -> Result<WriteSummary> {
        ContainerWriter::new(Arc::new(TypeRegistry::with_builtins())).create(catalog, output_path)
    }

    /// Read a container, decoding every item eagerly
    ///
    /// # Errors
    /// Returns format, integrity or resolution errors; see [`ContainerReader`].
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Catalog> {
        ContainerReader::new(Arc::new(TypeRegistry::with_builtins()))
            .read(path, &mut LoadPolicy::new())
    }

    /// Decode only the header and head record
    ///
    /// # Errors
    /// Returns an error if the header or head record is invalid.
    pub fn read_head<P: AsRef<Path>>(path: P) -> Result<(ContainerHeader, ManifestHead)> {
        ContainerReader::read_head(path)
    }

    /// Check the header, both region hashes and every item hash without
    /// decoding any asset
    ///
    /// # Errors
    /// Returns the first integrity or resolution failure.
    pub fn verify<P: AsRef<Path>>(path: P) -> Result<VerifyReport> {
        let path = path.as_ref();
        let reader = ContainerReader::new(Arc::new(TypeRegistry::with_builtins()));
        let catalog = reader.read(path, &mut LoadPolicy::lazy())?;
        let header = ContainerReader::read_header(path)?;

        let unverified = catalog
            .items
            .iter()
            .filter(|item| item.hash.is_none())
            .map(|item| item.asset_id.clone())
            .collect();
        Ok(VerifyReport {
            header,
            item_count: catalog.items.len(),
            head: catalog.head,
            unverified,
        })
    }

    /// List the manifest's items in order
    ///
    /// # Errors
    /// Returns an error if the header or manifest is invalid.
    pub fn list<P: AsRef<Path>>(path: P) -> Result<Vec<ItemListing>> {
        let path = path.as_ref();
        let header = ContainerReader::read_header(path)?;
        let window = RegionReader::open(
            path,
            u64::from(header.manifest_offset),
            u64::from(header.manifest_length),
        )?;
        let mut manifest = ManifestReader::new(BufReader::new(window));
        manifest.read_head()?;

        let mut listing = Vec::new();
        while let Some(parsed) = manifest.next_item()? {
            let item = parsed.item;
            let length = match item.storage {
                StorageMode::ManifestData => item.location.map(|range| range.length),
                StorageMode::InManifest => Some(parsed.inline.map_or(0, |p| p.length)),
                StorageMode::Outside => None,
            };
            listing.push(ItemListing {
                asset_id: item.asset_id,
                type_name: item.type_name,
                storage: item.storage,
                length,
                hash: item.hash,
                outside_path: item.outside_path,
            });
        }
        Ok(listing)
    }
}
