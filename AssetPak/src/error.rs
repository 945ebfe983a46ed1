//! Error types for `AssetPak`

use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;

use crate::container::Region;

/// The error type for `AssetPak` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    // ==================== IO Errors ====================
    /// IO error from file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Header / Format Errors ====================
    /// The header is shorter than the fixed header size.
    #[error("container header truncated: expected {expected} bytes, found {found}")]
    HeaderTruncated {
        /// The fixed header size.
        expected: usize,
        /// The number of bytes available.
        found: usize,
    },

    /// The stored header checksum does not match the recomputed one.
    #[error("header checksum mismatch: stored {stored:#04x}, computed {computed:#04x}")]
    HeaderChecksumMismatch {
        /// Checksum byte found in the header.
        stored: u8,
        /// Checksum recomputed over the preceding header bytes.
        computed: u8,
    },

    /// The file does not start with the container magic.
    #[error("invalid container magic: expected APAK, found {0:?}")]
    InvalidMagic([u8; 4]),

    /// The container format version is not supported.
    #[error("unsupported container version: {version} (supported: {min}-{max})")]
    UnsupportedVersion {
        /// The version found in the header.
        version: u8,
        /// Minimum supported version.
        min: u8,
        /// Maximum supported version.
        max: u8,
    },

    /// A region described by the header does not lie inside the file.
    #[error("{region} region out of bounds: offset {offset} + length {length} exceeds file size {file_len}")]
    RegionOutOfBounds {
        /// Which region.
        region: Region,
        /// Region start offset.
        offset: u64,
        /// Region length.
        length: u64,
        /// Actual file length.
        file_len: u64,
    },

    /// The data region starts before the manifest region ends.
    #[error("regions overlap: data starts at {data_offset}, manifest ends at {manifest_end}")]
    RegionsOverlap {
        /// End of the manifest region.
        manifest_end: u64,
        /// Start of the data region.
        data_offset: u64,
    },

    /// A region grew beyond what its header field can address.
    #[error("{region} region too large: {size} bytes")]
    RegionTooLarge {
        /// Which region.
        region: Region,
        /// The size that did not fit.
        size: u64,
    },

    // ==================== Manifest Errors ====================
    /// XML parsing error.
    #[error("XML parse error: {0}")]
    XmlError(#[from] quick_xml::Error),

    /// XML attribute error.
    #[error("XML attribute error: {0}")]
    XmlAttrError(String),

    /// The manifest text is well-formed XML but not a valid manifest.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// An inline payload chunk is not valid base64.
    #[error("invalid inline payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    // ==================== Integrity Errors ====================
    /// A region's content hash does not match the header.
    #[error("{region} region hash mismatch: expected {expected}, computed {actual}")]
    RegionHashMismatch {
        /// Which region.
        region: Region,
        /// Hash recorded in the header.
        expected: String,
        /// Hash computed over the region bytes.
        actual: String,
    },

    /// An item's content hash does not match its bytes.
    #[error("content hash mismatch: expected {expected}, computed {actual}")]
    ContentHashMismatch {
        /// Hash recorded in the manifest.
        expected: String,
        /// Hash computed over the resolved bytes.
        actual: String,
    },

    /// A `ManifestData` item addresses bytes outside the data region.
    #[error("item range {start}+{length} exceeds data region of {region_len} bytes")]
    ItemOutOfBounds {
        /// Item start, relative to the data region.
        start: u64,
        /// Item length.
        length: u64,
        /// Data region length.
        region_len: u64,
    },

    // ==================== Resolution Errors ====================
    /// No serializer is registered for the type name.
    #[error("unknown asset type: {0}")]
    UnknownAssetType(String),

    /// An `Outside` item's file is missing although a hash was expected.
    #[error("outside file missing: {path}")]
    OutsideFileMissing {
        /// The resolved absolute path.
        path: PathBuf,
    },

    /// An item that must be staged carries no asset.
    #[error("item has no asset attached")]
    MissingAsset,

    /// The asset body does not match the serializer's kind.
    #[error("asset kind mismatch for '{type_name}': expected {expected}, found {found}")]
    AssetKindMismatch {
        /// The registered type name.
        type_name: String,
        /// Kind the serializer handles.
        expected: &'static str,
        /// Kind of the asset body supplied.
        found: &'static str,
    },

    /// Invalid file path (absolute or escaping the container directory).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    // ==================== Registry / Policy Errors ====================
    /// A contribution collided with an existing key under the `Reject` policy.
    #[error("duplicate {what}: '{key}'")]
    Duplicate {
        /// What kind of key collided (type mapping, asset id, load handler).
        what: &'static str,
        /// The colliding key.
        key: String,
    },

    /// The load selector picked a custom handler that was never registered.
    #[error("no load handler registered for key '{0}'")]
    UnknownLoadHandler(String),

    /// A lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    // ==================== Lazy Proxy Errors ====================
    /// A load/unload was attempted from inside a notification on the same proxy.
    #[error("reentrant load/unload on lazy asset '{0}'")]
    LazyReentrant(String),

    // ==================== Configuration Errors ====================
    /// Configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Pipeline Annotation ====================
    /// A failure while processing one manifest item.
    #[error("item '{id}': {source}")]
    Item {
        /// The asset id of the failing item.
        id: String,
        /// The originating error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the id of the item being processed.
    pub(crate) fn for_item(id: impl Into<String>, source: Error) -> Self {
        Error::Item {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// The innermost item id this error was raised for, if any.
    #[must_use]
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Error::Item { id, source } => source.item_id().or(Some(id.as_str())),
            _ => None,
        }
    }

    /// The error stripped of item annotations.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Item { source, .. } => source.root(),
            other => other,
        }
    }

    /// Human-readable trail of the error chain, outermost first.
    #[must_use]
    pub fn trail(&self) -> String {
        let mut out = String::new();
        let mut current = self;
        loop {
            match current {
                Error::Item { id, source } => {
                    let _ = write!(out, "item '{id}' -> ");
                    current = source;
                }
                other => {
                    let _ = write!(out, "{other}");
                    break;
                }
            }
        }
        out
    }
}

// Add conversion from quick_xml::events::attributes::AttrError
impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlAttrError(err.to_string())
    }
}

/// A specialized Result type for `AssetPak` operations.
pub type Result<T> = std::result::Result<T, Error>;
