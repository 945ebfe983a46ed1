//! Fixed container header codec
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! Layout (big-endian):
//!
//! | Offset | Size | Field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | magic `APAK`          |
//! | 4      | 1    | format version        |
//! | 5      | 4    | application tag       |
//! | 9      | 4    | manifest offset       |
//! | 13     | 4    | manifest length       |
//! | 17     | 16   | manifest MD5          |
//! | 33     | 8    | data offset           |
//! | 41     | 8    | data length           |
//! | 49     | 16   | data MD5              |
//! | 65     | 1    | CRC-8 of bytes 0..65  |

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{HEADER_SIZE, MAGIC, MAX_VERSION, MIN_VERSION};
use crate::error::{Error, Result};
use crate::hash::{ContentHash, crc8};

/// Decoded container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u8,
    /// Caller-defined application tag
    pub app_tag: u32,
    pub manifest_offset: u32,
    pub manifest_length: u32,
    pub manifest_hash: ContentHash,
    pub data_offset: u64,
    pub data_length: u64,
    pub data_hash: ContentHash,
}

impl ContainerHeader {
    /// Encode into the fixed-size block, appending the checksum
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut out[..]);

        // Writes into a correctly sized array cannot fail
        let _ = self.write_fields(&mut cursor);

        out[HEADER_SIZE - 1] = crc8(&out[..HEADER_SIZE - 1]);
        out
    }

    fn write_fields<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u8(self.version)?;
        w.write_u32::<BigEndian>(self.app_tag)?;
        w.write_u32::<BigEndian>(self.manifest_offset)?;
        w.write_u32::<BigEndian>(self.manifest_length)?;
        w.write_all(&self.manifest_hash.0)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        w.write_u64::<BigEndian>(self.data_length)?;
        w.write_all(&self.data_hash.0)?;
        Ok(())
    }

    /// Decode and validate a header block.
    ///
    /// The checksum is verified before any field is interpreted, so a
    /// corrupt header never yields offsets.
    ///
    /// # Errors
    /// Returns [`Error::HeaderTruncated`], [`Error::HeaderChecksumMismatch`],
    /// [`Error::InvalidMagic`] or [`Error::UnsupportedVersion`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::HeaderTruncated {
                expected: HEADER_SIZE,
                found: bytes.len(),
            });
        }
        let bytes = &bytes[..HEADER_SIZE];

        let stored = bytes[HEADER_SIZE - 1];
        let computed = crc8(&bytes[..HEADER_SIZE - 1]);
        if stored != computed {
            return Err(Error::HeaderChecksumMismatch { stored, computed });
        }

        let mut r = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let version = r.read_u8()?;
        if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
            return Err(Error::UnsupportedVersion {
                version,
                min: MIN_VERSION,
                max: MAX_VERSION,
            });
        }

        let app_tag = r.read_u32::<BigEndian>()?;
        let manifest_offset = r.read_u32::<BigEndian>()?;
        let manifest_length = r.read_u32::<BigEndian>()?;
        let mut manifest_hash = [0u8; 16];
        r.read_exact(&mut manifest_hash)?;
        let data_offset = r.read_u64::<BigEndian>()?;
        let data_length = r.read_u64::<BigEndian>()?;
        let mut data_hash = [0u8; 16];
        r.read_exact(&mut data_hash)?;

        Ok(Self {
            version,
            app_tag,
            manifest_offset,
            manifest_length,
            manifest_hash: ContentHash(manifest_hash),
            data_offset,
            data_length,
            data_hash: ContentHash(data_hash),
        })
    }

    /// Read and decode the header from the start of a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        reader.take(HEADER_SIZE as u64).read_to_end(&mut buf)?;
        Self::decode(&buf)
    }

    /// Exclusive end offset of the manifest region
    #[must_use]
    pub fn manifest_end(&self) -> u64 {
        u64::from(self.manifest_offset) + u64::from(self.manifest_length)
    }

    /// Exclusive end offset of the data region (saturating on corrupt values)
    #[must_use]
    pub fn data_end(&self) -> u64 {
        self.data_offset.saturating_add(self.data_length)
    }
}
