//! Asset values carried by catalog items
//!
//! The set of asset classes is closed ([`AssetKind`]); type names in a
//! manifest map onto one of them through the [`crate::registry::TypeRegistry`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::loading::LazyAsset;

/// The closed set of asset classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    Text,
    Image,
    Record,
    Binary,
}

impl AssetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Text => "text",
            AssetKind::Image => "image",
            AssetKind::Record => "record",
            AssetKind::Binary => "binary",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image container format, sniffed from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Dds,
    Unknown,
}

impl ImageFormat {
    /// Detect the format from the leading bytes of an image
    #[must_use]
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            ImageFormat::Png
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            ImageFormat::Gif
        } else if bytes.starts_with(b"DDS ") {
            ImageFormat::Dds
        } else {
            ImageFormat::Unknown
        }
    }
}

/// Encoded image bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub format: ImageFormat,
    pub data: Vec<u8>,
}

impl ImageAsset {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            format: ImageFormat::sniff(&data),
            data,
        }
    }
}

/// Structured record (order-preserving JSON object)
pub type Record = IndexMap<String, serde_json::Value>;

/// Decoded asset content
#[derive(Debug, Clone, PartialEq)]
pub enum AssetBody {
    Text(String),
    Image(ImageAsset),
    Record(Record),
    Binary(Vec<u8>),
}

impl AssetBody {
    #[must_use]
    pub fn kind(&self) -> AssetKind {
        match self {
            AssetBody::Text(_) => AssetKind::Text,
            AssetBody::Image(_) => AssetKind::Image,
            AssetBody::Record(_) => AssetKind::Record,
            AssetBody::Binary(_) => AssetKind::Binary,
        }
    }
}

/// An asset: id, registered type name and decoded body
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: String,
    pub type_name: String,
    pub body: AssetBody,
}

impl Asset {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>, body: AssetBody) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            body,
        }
    }

    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, AssetKind::Text.as_str(), AssetBody::Text(text.into()))
    }

    pub fn image(id: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(id, AssetKind::Image.as_str(), AssetBody::Image(ImageAsset::new(data)))
    }

    pub fn record(id: impl Into<String>, record: Record) -> Self {
        Self::new(id, AssetKind::Record.as_str(), AssetBody::Record(record))
    }

    pub fn binary(id: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(id, AssetKind::Binary.as_str(), AssetBody::Binary(data))
    }
}

/// Live reference held by a catalog item
#[derive(Debug, Clone)]
pub enum AssetRef {
    /// Fully decoded asset
    Ready(Arc<Asset>),
    /// Deferred asset, decoded on first access
    Lazy(Arc<LazyAsset>),
}

impl AssetRef {
    #[must_use]
    pub fn ready(asset: Asset) -> Self {
        AssetRef::Ready(Arc::new(asset))
    }

    /// Get the asset, decoding a lazy proxy if needed
    pub fn get(&self) -> Result<Arc<Asset>> {
        match self {
            AssetRef::Ready(asset) => Ok(Arc::clone(asset)),
            AssetRef::Lazy(proxy) => proxy.get(),
        }
    }

    /// Whether the asset is available without decoding
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        match self {
            AssetRef::Ready(_) => true,
            AssetRef::Lazy(proxy) => proxy.is_loaded(),
        }
    }

    #[must_use]
    pub fn as_lazy(&self) -> Option<&Arc<LazyAsset>> {
        match self {
            AssetRef::Lazy(proxy) => Some(proxy),
            AssetRef::Ready(_) => None,
        }
    }
}
