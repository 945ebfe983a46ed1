//! Writer and reader options
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::container::{FORMAT_VERSION, MAX_VERSION, MIN_VERSION};
use crate::error::{Error, Result};
use crate::manifest::{DEFAULT_CHUNK_SIZE, normalize_chunk_size};
use crate::registry::ConflictPolicy;

/// Options for [`crate::container::ContainerWriter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Format version stamped into the header
    pub format_version: u8,
    /// Caller-defined application tag
    pub app_tag: u32,
    /// When `false`, items with [`HashPolicy::Compute`](crate::container::HashPolicy)
    /// are written without a hash
    pub hash_items: bool,
    /// Raw bytes per inline payload chunk
    pub chunk_size: usize,
    /// Policy for items sharing an asset id
    pub duplicate_ids: ConflictPolicy,
    /// Write assets of `Outside` items next to the container
    pub materialize_outside: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            app_tag: 0,
            hash_items: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            duplicate_ids: ConflictPolicy::Reject,
            materialize_outside: true,
        }
    }
}

impl WriterOptions {
    /// Check ranges and normalize the chunk size
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.format_version) {
            return Err(Error::InvalidConfig(format!(
                "format_version {} not in {MIN_VERSION}..={MAX_VERSION}",
                self.format_version
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".to_string()));
        }
        self.chunk_size = normalize_chunk_size(self.chunk_size);
        Ok(())
    }
}

/// Options for [`crate::container::ContainerReader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Hash the manifest region and compare with the header
    pub verify_manifest_region: bool,
    /// Hash the data region and compare with the header
    pub verify_data_region: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            verify_manifest_region: true,
            verify_data_region: true,
        }
    }
}

/// Combined options, as loaded from a JSON config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub writer: WriterOptions,
    pub reader: ReaderOptions,
}

impl PackConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns an error if reading, deserialization or validation fails.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut config: PackConfig = serde_json::from_str(&json)?;
        config.writer.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save_to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
