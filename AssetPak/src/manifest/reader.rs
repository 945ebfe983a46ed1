//! Manifest XML pull parser
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! The head is returned before any item is read, and items are yielded one
//! at a time in document order. Inline payload chunks are base64-decoded
//! straight into a temporary file as they stream past, so memory use does
//! not depend on payload size.

use std::io::{BufRead, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tempfile::NamedTempFile;

use super::{
    EL_CHUNK, EL_HEAD, EL_ITEM, EL_ITEMS, EL_MANIFEST, EL_PAYLOAD, MANIFEST_FORMAT, NO_LOCATION,
};
use crate::container::{ByteRange, ManifestHead, ManifestItem, PackageKey, StorageMode};
use crate::error::{Error, Result};
use crate::hash::ContentHash;

/// Inline payload bytes spilled to a temporary file
#[derive(Debug)]
pub struct InlinePayload {
    /// Deleted when dropped
    pub file: NamedTempFile,
    pub length: u64,
}

/// One parsed item and, for `InManifest` items, its spilled payload
#[derive(Debug)]
pub struct ParsedItem {
    pub item: ManifestItem,
    pub inline: Option<InlinePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    BeforeHead,
    AfterHead,
    InItems,
    Done,
}

/// Pull parser over manifest text
pub struct ManifestReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    state: ParseState,
    declared_count: Option<usize>,
    yielded: usize,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedManifest(msg.into())
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: Reader::from_reader(inner),
            buf: Vec::new(),
            state: ParseState::BeforeHead,
            declared_count: None,
            yielded: 0,
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>> {
        self.buf.clear();
        Ok(self.reader.read_event_into(&mut self.buf)?.into_owned())
    }

    /// Read up to and including the head record
    ///
    /// # Errors
    /// Returns [`Error::MalformedManifest`] if the root element or head is
    /// missing or invalid, or [`Error::XmlError`] for broken XML.
    pub fn read_head(&mut self) -> Result<ManifestHead> {
        if self.state != ParseState::BeforeHead {
            return Err(malformed("head already read"));
        }

        let mut seen_root = false;
        loop {
            match self.next_event()? {
                Event::Start(e) if e.name().as_ref() == EL_MANIFEST => {
                    check_format(&e)?;
                    seen_root = true;
                }
                Event::Start(e) if e.name().as_ref() == EL_HEAD => {
                    if !seen_root {
                        return Err(malformed("head outside <manifest>"));
                    }
                    let head = parse_head(&e)?;
                    // Nothing inside <head> is read; skip to its end tag
                    self.buf.clear();
                    self.reader.read_to_end_into(e.name(), &mut self.buf)?;
                    self.state = ParseState::AfterHead;
                    return Ok(head);
                }
                Event::Empty(e) if e.name().as_ref() == EL_HEAD => {
                    if !seen_root {
                        return Err(malformed("head outside <manifest>"));
                    }
                    let head = parse_head(&e)?;
                    self.state = ParseState::AfterHead;
                    return Ok(head);
                }
                Event::Start(e) | Event::Empty(e) => {
                    return Err(malformed(format!(
                        "unexpected <{}> before head",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                Event::Text(t) => {
                    if !t.unescape()?.trim().is_empty() {
                        return Err(malformed("text content before head"));
                    }
                }
                Event::Eof => return Err(malformed("missing head record")),
                Event::End(_) => return Err(malformed("missing head record")),
                _ => {}
            }
        }
    }

    /// Read the next item, or `None` after the last one
    ///
    /// # Errors
    /// Returns [`Error::MalformedManifest`] for invalid item records or
    /// payloads, [`Error::Base64`] for undecodable chunks, or an IO error if
    /// the payload cannot be spilled.
    pub fn next_item(&mut self) -> Result<Option<ParsedItem>> {
        match self.state {
            ParseState::BeforeHead => return Err(malformed("items requested before head")),
            ParseState::Done => return Ok(None),
            ParseState::AfterHead | ParseState::InItems => {}
        }

        loop {
            let event = self.next_event()?;
            match (self.state, event) {
                (ParseState::AfterHead, Event::Start(e)) if e.name().as_ref() == EL_ITEMS => {
                    self.declared_count = parse_count(&e)?;
                    self.state = ParseState::InItems;
                }
                (ParseState::AfterHead, Event::Empty(e)) if e.name().as_ref() == EL_ITEMS => {
                    self.declared_count = parse_count(&e)?;
                    return self.finish_items();
                }
                (ParseState::AfterHead, Event::End(e)) if e.name().as_ref() == EL_MANIFEST => {
                    return self.finish_items();
                }
                (ParseState::InItems, Event::Start(e)) if e.name().as_ref() == EL_ITEM => {
                    let item = parse_item(&e)?;
                    let inline = self
                        .read_item_body()
                        .map_err(|err| Error::for_item(&item.asset_id, err))?;
                    self.yielded += 1;
                    return Ok(Some(ParsedItem { item, inline }));
                }
                (ParseState::InItems, Event::Empty(e)) if e.name().as_ref() == EL_ITEM => {
                    let item = parse_item(&e)?;
                    self.yielded += 1;
                    return Ok(Some(ParsedItem { item, inline: None }));
                }
                (ParseState::InItems, Event::End(e)) if e.name().as_ref() == EL_ITEMS => {
                    return self.finish_items();
                }
                (_, Event::Start(e)) => {
                    // Unknown element: skip it whole
                    self.buf.clear();
                    self.reader.read_to_end_into(e.name(), &mut self.buf)?;
                }
                (_, Event::Text(t)) => {
                    if !t.unescape()?.trim().is_empty() {
                        return Err(malformed("unexpected text between items"));
                    }
                }
                (_, Event::Eof) => return Err(malformed("unterminated item list")),
                (_, Event::End(e)) => {
                    return Err(malformed(format!(
                        "unexpected </{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                _ => {}
            }
        }
    }

    fn finish_items(&mut self) -> Result<Option<ParsedItem>> {
        self.state = ParseState::Done;
        if let Some(declared) = self.declared_count
            && declared != self.yielded
        {
            return Err(malformed(format!(
                "item list declares {declared} items but contains {}",
                self.yielded
            )));
        }
        Ok(None)
    }

    /// Consume an item's body up to `</item>`, spilling any payload
    fn read_item_body(&mut self) -> Result<Option<InlinePayload>> {
        let mut inline = None;
        loop {
            match self.next_event()? {
                Event::Start(e) if e.name().as_ref() == EL_PAYLOAD => {
                    if inline.is_some() {
                        return Err(malformed("item has more than one payload"));
                    }
                    let declared = parse_payload_length(&e)?;
                    inline = Some(self.spill_payload(declared)?);
                }
                Event::Empty(e) if e.name().as_ref() == EL_PAYLOAD => {
                    if parse_payload_length(&e)?.unwrap_or(0) != 0 {
                        return Err(malformed("empty payload element declares a length"));
                    }
                }
                Event::End(e) if e.name().as_ref() == EL_ITEM => return Ok(inline),
                Event::Start(e) => {
                    self.buf.clear();
                    self.reader.read_to_end_into(e.name(), &mut self.buf)?;
                }
                Event::Text(t) => {
                    if !t.unescape()?.trim().is_empty() {
                        return Err(malformed("unexpected text in item"));
                    }
                }
                Event::Eof => return Err(malformed("unterminated item")),
                Event::End(_) => return Err(malformed("mismatched end tag in item")),
                _ => {}
            }
        }
    }

    /// Decode `<chunk>` elements into a temp file until `</payload>`
    fn spill_payload(&mut self, declared: Option<u64>) -> Result<InlinePayload> {
        let mut file = NamedTempFile::new()?;
        let mut length = 0u64;
        let mut chunk_text: Option<String> = None;

        loop {
            match self.next_event()? {
                Event::Start(e) if e.name().as_ref() == EL_CHUNK => {
                    if chunk_text.is_some() {
                        return Err(malformed("nested chunk"));
                    }
                    chunk_text = Some(String::new());
                }
                Event::Empty(e) if e.name().as_ref() == EL_CHUNK => {}
                Event::Text(t) => {
                    let text = t.unescape()?;
                    match chunk_text.as_mut() {
                        Some(buf) => buf.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => return Err(malformed("payload text outside chunk")),
                    }
                }
                Event::CData(c) => match chunk_text.as_mut() {
                    Some(buf) => buf.push_str(&String::from_utf8(c.into_inner().into_owned())?),
                    None => return Err(malformed("payload text outside chunk")),
                },
                Event::End(e) if e.name().as_ref() == EL_CHUNK => {
                    let text = chunk_text
                        .take()
                        .ok_or_else(|| malformed("unbalanced chunk"))?;
                    let bytes = STANDARD.decode(text.trim())?;
                    file.write_all(&bytes)?;
                    length += bytes.len() as u64;
                }
                Event::End(e) if e.name().as_ref() == EL_PAYLOAD => break,
                Event::Eof => return Err(malformed("unterminated payload")),
                Event::Start(_) | Event::Empty(_) | Event::End(_) => {
                    return Err(malformed("unexpected element in payload"));
                }
                _ => {}
            }
        }

        if let Some(declared) = declared
            && declared != length
        {
            return Err(malformed(format!(
                "payload declares {declared} bytes but contains {length}"
            )));
        }

        file.flush()?;
        Ok(InlinePayload { file, length })
    }
}

fn attr_map(e: &BytesStart<'_>) -> Result<Vec<(Vec<u8>, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        out.push((attr.key.as_ref().to_vec(), attr.unescape_value()?.into_owned()));
    }
    Ok(out)
}

fn check_format(e: &BytesStart<'_>) -> Result<()> {
    for (key, value) in attr_map(e)? {
        if key == b"format" && value != MANIFEST_FORMAT {
            return Err(malformed(format!("unsupported manifest format '{value}'")));
        }
    }
    Ok(())
}

fn parse_head(e: &BytesStart<'_>) -> Result<ManifestHead> {
    let mut key = PackageKey::default();
    let mut version = String::new();
    let mut name = String::new();
    let mut remark = String::new();
    let mut created = None;

    for (attr, value) in attr_map(e)? {
        match attr.as_slice() {
            b"group" => key.group = value,
            b"id" => key.id = value,
            b"version" => version = value,
            b"name" => name = value,
            b"remark" => remark = value,
            b"created" => {
                let parsed = DateTime::parse_from_rfc3339(&value)
                    .map_err(|err| malformed(format!("invalid created timestamp '{value}': {err}")))?;
                created = Some(parsed.with_timezone(&Utc));
            }
            _ => {}
        }
    }

    Ok(ManifestHead {
        key,
        version,
        name,
        remark,
        created: created.ok_or_else(|| malformed("head has no created timestamp"))?,
        file_path: None,
    })
}

fn parse_count(e: &BytesStart<'_>) -> Result<Option<usize>> {
    for (key, value) in attr_map(e)? {
        if key == b"count" {
            return value
                .parse()
                .map(Some)
                .map_err(|_| malformed(format!("invalid item count '{value}'")));
        }
    }
    Ok(None)
}

fn parse_payload_length(e: &BytesStart<'_>) -> Result<Option<u64>> {
    for (key, value) in attr_map(e)? {
        if key == b"length" {
            return value
                .parse()
                .map(Some)
                .map_err(|_| malformed(format!("invalid payload length '{value}'")));
        }
    }
    Ok(None)
}

fn parse_location_field(value: &str, field: &str) -> Result<Option<u64>> {
    let n: i64 = value
        .parse()
        .map_err(|_| malformed(format!("invalid {field} '{value}'")))?;
    match n {
        NO_LOCATION => Ok(None),
        n if n < 0 => Err(malformed(format!("negative {field} {n}"))),
        n => Ok(Some(n as u64)),
    }
}

fn parse_item(e: &BytesStart<'_>) -> Result<ManifestItem> {
    let mut id = None;
    let mut type_name = None;
    let mut storage = None;
    let mut hash = None;
    let mut start = None;
    let mut length = None;
    let mut path = None;

    for (key, value) in attr_map(e)? {
        match key.as_slice() {
            b"id" => id = Some(value),
            b"type" => type_name = Some(value),
            b"storage" => storage = Some(value.parse::<StorageMode>()?),
            b"hash" => {
                if !value.is_empty() {
                    hash = Some(ContentHash::from_hex(&value)?);
                }
            }
            b"start" => start = parse_location_field(&value, "start")?,
            b"length" => length = parse_location_field(&value, "length")?,
            b"path" => path = Some(value),
            _ => {}
        }
    }

    let id = id.ok_or_else(|| malformed("item without id"))?;
    let annotate = |err: Error| Error::for_item(&id, err);
    let type_name = type_name.ok_or_else(|| annotate(malformed("item without type")))?;
    let storage = storage.ok_or_else(|| annotate(malformed("item without storage mode")))?;

    let location = match (start, length) {
        (Some(start), Some(length)) => Some(ByteRange::new(start, length)),
        (None, None) => None,
        _ => return Err(annotate(malformed("item start/length must both be set or both be -1"))),
    };

    match storage {
        StorageMode::ManifestData if location.is_none() => {
            return Err(annotate(malformed("ManifestData item has no location")));
        }
        StorageMode::Outside if path.is_none() => {
            return Err(annotate(malformed("Outside item has no path")));
        }
        _ => {}
    }

    let mut item = ManifestItem::new(id, type_name, storage);
    item.hash = hash;
    item.location = if storage == StorageMode::ManifestData {
        location
    } else {
        None
    };
    item.outside_path = path.filter(|_| storage == StorageMode::Outside);
    Ok(item)
}
