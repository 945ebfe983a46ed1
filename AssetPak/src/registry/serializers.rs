//! Built-in serializers for the closed asset classes

use std::io::{Read, Write};

use super::AssetSerializer;
use crate::asset::{Asset, AssetBody, AssetKind, ImageAsset, Record};
use crate::error::{Error, Result};

fn read_window(input: &mut dyn Read, length: u64) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(usize::try_from(length).unwrap_or(0).min(1 << 24));
    input.take(length).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < length {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {length} bytes, got {}", bytes.len()),
        )));
    }
    Ok(bytes)
}

fn mismatch(kind: AssetKind, asset: &Asset) -> Error {
    Error::AssetKindMismatch {
        type_name: asset.type_name.clone(),
        expected: kind.as_str(),
        found: asset.body.kind().as_str(),
    }
}

/// UTF-8 text
#[derive(Debug, Default, Clone, Copy)]
pub struct TextSerializer;

impl AssetSerializer for TextSerializer {
    fn kind(&self) -> AssetKind {
        AssetKind::Text
    }

    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
        let AssetBody::Text(text) = &asset.body else {
            return Err(mismatch(self.kind(), asset));
        };
        out.write_all(text.as_bytes())?;
        Ok(())
    }

    fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody> {
        Ok(AssetBody::Text(String::from_utf8(read_window(input, length)?)?))
    }
}

/// Encoded image bytes, stored verbatim
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageSerializer;

impl AssetSerializer for ImageSerializer {
    fn kind(&self) -> AssetKind {
        AssetKind::Image
    }

    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
        let AssetBody::Image(image) = &asset.body else {
            return Err(mismatch(self.kind(), asset));
        };
        out.write_all(&image.data)?;
        Ok(())
    }

    fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody> {
        Ok(AssetBody::Image(ImageAsset::new(read_window(input, length)?)))
    }
}

/// JSON object records.
///
/// An empty window decodes to an empty record, so a tolerated missing
/// `Outside` file still yields a usable asset.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordSerializer;

impl AssetSerializer for RecordSerializer {
    fn kind(&self) -> AssetKind {
        AssetKind::Record
    }

    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
        let AssetBody::Record(record) = &asset.body else {
            return Err(mismatch(self.kind(), asset));
        };
        serde_json::to_writer_pretty(out, record)?;
        Ok(())
    }

    fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody> {
        let bytes = read_window(input, length)?;
        if bytes.is_empty() {
            return Ok(AssetBody::Record(Record::new()));
        }
        Ok(AssetBody::Record(serde_json::from_slice(&bytes)?))
    }
}

/// Opaque bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct BinarySerializer;

impl AssetSerializer for BinarySerializer {
    fn kind(&self) -> AssetKind {
        AssetKind::Binary
    }

    fn serialize(&self, asset: &Asset, out: &mut dyn Write) -> Result<()> {
        let AssetBody::Binary(data) = &asset.body else {
            return Err(mismatch(self.kind(), asset));
        };
        out.write_all(data)?;
        Ok(())
    }

    fn deserialize(&self, input: &mut dyn Read, length: u64) -> Result<AssetBody> {
        Ok(AssetBody::Binary(read_window(input, length)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(serializer: &dyn AssetSerializer, asset: &Asset) -> AssetBody {
        let mut bytes = Vec::new();
        serializer.serialize(asset, &mut bytes).unwrap();
        serializer
            .deserialize(&mut bytes.as_slice(), bytes.len() as u64)
            .unwrap()
    }

    #[test]
    fn test_record_preserves_key_order() {
        let mut record = Record::new();
        record.insert("zeta".into(), json!(1));
        record.insert("alpha".into(), json!({"nested": [1, 2]}));
        let asset = Asset::record("r", record.clone());
        let AssetBody::Record(decoded) = round_trip(&RecordSerializer, &asset) else {
            panic!("expected record");
        };
        assert_eq!(decoded.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_empty_window_decodes() {
        let empty: &[u8] = &[];
        assert_eq!(
            RecordSerializer.deserialize(&mut &empty[..], 0).unwrap(),
            AssetBody::Record(Record::new())
        );
        assert_eq!(
            TextSerializer.deserialize(&mut &empty[..], 0).unwrap(),
            AssetBody::Text(String::new())
        );
    }

    #[test]
    fn test_short_window_is_an_error() {
        let bytes = b"abc";
        assert!(TextSerializer.deserialize(&mut &bytes[..], 10).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let bytes = [0xFFu8, 0xFE];
        assert!(matches!(
            TextSerializer.deserialize(&mut &bytes[..], 2),
            Err(Error::Utf8Error(_))
        ));
    }

    #[test]
    fn test_wrong_body_rejected() {
        let asset = Asset::text("t", "hello");
        let mut out = Vec::new();
        assert!(ImageSerializer.serialize(&asset, &mut out).is_err());
        assert!(out.is_empty());
    }
}
