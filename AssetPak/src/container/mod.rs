//! SPDX-FileCopyrightText: 2025 CyberDeco
//!
//! SPDX-License-Identifier: MIT
//!
//! Asset container file format: `[header][manifest region][data region]`
//!
//! The header is a fixed 66-byte block guarded by a CRC-8. The manifest
//! region is XML text (see [`crate::manifest`]); the data region is raw
//! concatenated asset bytes addressed by item offsets.

mod header;
mod operations;
mod reader;
mod region;
mod types;
mod writer;

pub use header::ContainerHeader;
pub use operations::{ContainerOperations, ItemListing, VerifyReport};
pub use reader::{ContainerReader, ItemSource, SourceBacking};
pub use region::RegionReader;
pub use types::*;
pub use writer::{ContainerWriter, WriteSummary};

/// Container magic bytes
pub const MAGIC: [u8; 4] = [b'A', b'P', b'A', b'K'];

/// Format version written by this library
pub const FORMAT_VERSION: u8 = 1;

/// Minimum supported format version
pub const MIN_VERSION: u8 = 1;

/// Maximum supported format version
pub const MAX_VERSION: u8 = 1;

/// Size of the fixed header in bytes (including the trailing checksum)
pub const HEADER_SIZE: usize = 66;

/// Progress callback for container operations
pub type ProgressCallback<'a> = &'a dyn Fn(&ContainerProgress);
