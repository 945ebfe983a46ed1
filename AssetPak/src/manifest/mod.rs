//! SPDX-FileCopyrightText: 2025 CyberDeco
//!
//! SPDX-License-Identifier: MIT
//!
//! Manifest codec: the XML catalog stored in a container's manifest region.
//!
//! ```xml
//! <manifest format="1">
//!     <head group="com.demo" id="pack" version="1.0.0" name="demo" remark="" created="2025-01-01T00:00:00Z" />
//!     <items count="2">
//!         <item id="a" type="text" storage="ManifestData" hash="..." start="0" length="100" />
//!         <item id="b" type="text" storage="InManifest" hash="..." start="-1" length="-1">
//!             <payload length="5">
//!                 <chunk>aGVsbG8=</chunk>
//!             </payload>
//!         </item>
//!     </items>
//! </manifest>
//! ```
//!
//! `payload` and `chunk` are reserved element names. Inline bytes are split
//! into base64 chunks so the reader can spill them to a temporary file one
//! chunk at a time.

mod reader;
mod writer;

pub use reader::{InlinePayload, ManifestReader, ParsedItem};
pub use writer::ManifestWriter;

/// Manifest format revision written in the root element
pub const MANIFEST_FORMAT: &str = "1";

/// Default raw bytes per inline payload chunk
pub const DEFAULT_CHUNK_SIZE: usize = 48 * 1024;

/// Location attribute value meaning "no location"
pub const NO_LOCATION: i64 = -1;

pub(crate) const EL_MANIFEST: &[u8] = b"manifest";
pub(crate) const EL_HEAD: &[u8] = b"head";
pub(crate) const EL_ITEMS: &[u8] = b"items";
pub(crate) const EL_ITEM: &[u8] = b"item";
pub(crate) const EL_PAYLOAD: &[u8] = b"payload";
pub(crate) const EL_CHUNK: &[u8] = b"chunk";

/// Round a requested chunk size down to a multiple of 3 (at least 3), so
/// every chunk but the last encodes to base64 without padding
#[must_use]
pub fn normalize_chunk_size(requested: usize) -> usize {
    (requested / 3).max(1) * 3
}
