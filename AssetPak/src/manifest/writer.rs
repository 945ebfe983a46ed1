//! Manifest XML writing
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT

use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::SecondsFormat;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{
    EL_CHUNK, EL_HEAD, EL_ITEM, EL_ITEMS, EL_MANIFEST, EL_PAYLOAD, MANIFEST_FORMAT, NO_LOCATION,
    normalize_chunk_size,
};
use crate::container::{ManifestHead, ManifestItem, StorageMode};
use crate::error::{Error, Result};

fn tag(name: &[u8]) -> &str {
    // Element names are ASCII constants
    std::str::from_utf8(name).unwrap_or_default()
}

/// Streaming manifest writer.
///
/// Call [`write_head`](Self::write_head) once, then
/// [`write_item`](Self::write_item) for each item in order, then
/// [`finish`](Self::finish).
pub struct ManifestWriter<W: Write> {
    writer: Writer<W>,
    chunk_size: usize,
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(inner: W, chunk_size: usize) -> Self {
        Self {
            writer: Writer::new_with_indent(inner, b'\t', 1),
            chunk_size: normalize_chunk_size(chunk_size),
        }
    }

    /// Write the declaration, root element, head record and opening `<items>`
    pub fn write_head(&mut self, head: &ManifestHead, item_count: usize) -> Result<()> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut root = BytesStart::new(tag(EL_MANIFEST));
        root.push_attribute(("format", MANIFEST_FORMAT));
        self.writer.write_event(Event::Start(root))?;

        let created = head.created.to_rfc3339_opts(SecondsFormat::AutoSi, true);
        let mut head_tag = BytesStart::new(tag(EL_HEAD));
        head_tag.push_attribute(("group", head.key.group.as_str()));
        head_tag.push_attribute(("id", head.key.id.as_str()));
        head_tag.push_attribute(("version", head.version.as_str()));
        head_tag.push_attribute(("name", head.name.as_str()));
        head_tag.push_attribute(("remark", head.remark.as_str()));
        head_tag.push_attribute(("created", created.as_str()));
        self.writer.write_event(Event::Empty(head_tag))?;

        let mut items = BytesStart::new(tag(EL_ITEMS));
        items.push_attribute(("count", item_count.to_string().as_str()));
        self.writer.write_event(Event::Start(items))?;
        Ok(())
    }

    /// Write one item record.
    ///
    /// `inline` carries the raw bytes and length of an `InManifest` item's
    /// payload; it is ignored for other storage modes.
    pub fn write_item(
        &mut self,
        item: &ManifestItem,
        inline: Option<(&mut dyn Read, u64)>,
    ) -> Result<()> {
        let (start, length) = match (item.storage, item.location) {
            (StorageMode::ManifestData, Some(range)) => (
                i64::try_from(range.start).map_err(|_| {
                    Error::MalformedManifest(format!("item offset {} too large", range.start))
                })?,
                i64::try_from(range.length).map_err(|_| {
                    Error::MalformedManifest(format!("item length {} too large", range.length))
                })?,
            ),
            (StorageMode::ManifestData, None) => {
                return Err(Error::MalformedManifest(
                    "ManifestData item has no location".to_string(),
                ));
            }
            _ => (NO_LOCATION, NO_LOCATION),
        };

        let hash = item.hash.map(|h| h.to_hex()).unwrap_or_default();

        let mut item_tag = BytesStart::new(tag(EL_ITEM));
        item_tag.push_attribute(("id", item.asset_id.as_str()));
        item_tag.push_attribute(("type", item.type_name.as_str()));
        item_tag.push_attribute(("storage", item.storage.as_str()));
        item_tag.push_attribute(("hash", hash.as_str()));
        item_tag.push_attribute(("start", start.to_string().as_str()));
        item_tag.push_attribute(("length", length.to_string().as_str()));
        if item.storage == StorageMode::Outside {
            let path = item.outside_path.as_deref().ok_or_else(|| {
                Error::InvalidPath(format!("Outside item '{}' has no path", item.asset_id))
            })?;
            item_tag.push_attribute(("path", path));
        }

        let inline = inline.filter(|_| item.storage == StorageMode::InManifest);
        let Some((source, declared)) = inline else {
            self.writer.write_event(Event::Empty(item_tag))?;
            return Ok(());
        };

        self.writer.write_event(Event::Start(item_tag))?;
        self.write_payload(source, declared)?;
        self.writer
            .write_event(Event::End(BytesEnd::new(tag(EL_ITEM))))?;
        Ok(())
    }

    fn write_payload(&mut self, source: &mut dyn Read, declared: u64) -> Result<()> {
        let mut payload = BytesStart::new(tag(EL_PAYLOAD));
        payload.push_attribute(("length", declared.to_string().as_str()));
        self.writer.write_event(Event::Start(payload))?;

        let mut chunk = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let filled = fill(source, &mut chunk)?;
            if filled == 0 {
                break;
            }
            total += filled as u64;

            let encoded = STANDARD.encode(&chunk[..filled]);
            self.writer
                .write_event(Event::Start(BytesStart::new(tag(EL_CHUNK))))?;
            self.writer
                .write_event(Event::Text(BytesText::new(&encoded)))?;
            self.writer
                .write_event(Event::End(BytesEnd::new(tag(EL_CHUNK))))?;
        }

        if total != declared {
            return Err(Error::MalformedManifest(format!(
                "inline payload declared {declared} bytes but {total} were staged"
            )));
        }

        self.writer
            .write_event(Event::End(BytesEnd::new(tag(EL_PAYLOAD))))?;
        Ok(())
    }

    /// Close `<items>` and the root element, returning the inner writer
    pub fn finish(mut self) -> Result<W> {
        self.writer
            .write_event(Event::End(BytesEnd::new(tag(EL_ITEMS))))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(tag(EL_MANIFEST))))?;
        let mut inner = self.writer.into_inner();
        inner.write_all(b"\n")?;
        inner.flush()?;
        Ok(inner)
    }
}

/// Read until `buf` is full or the source is exhausted
fn fill(source: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
