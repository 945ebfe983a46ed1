//! Bounded byte windows over a random-access source

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// A window `[start, start + length)` over an underlying seekable source.
///
/// Reads never go past the window and seeks are relative to its start, so
/// the manifest region, the data region and individual item ranges can each
/// be handed out as an independent stream.
#[derive(Debug)]
pub struct RegionReader<R> {
    inner: R,
    start: u64,
    length: u64,
    pos: u64,
}

impl RegionReader<File> {
    /// Open `path` with its own file handle and window it
    pub fn open(path: impl AsRef<Path>, start: u64, length: u64) -> io::Result<Self> {
        Self::new(File::open(path)?, start, length)
    }
}

impl<R: Seek> RegionReader<R> {
    /// Window an existing source, positioning it at the window start
    pub fn new(mut inner: R, start: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            length,
            pos: 0,
        })
    }
}

impl<R> RegionReader<R> {
    /// Window length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Absolute offset of the window start in the underlying source
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Bytes left before the end of the window
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.pos)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for RegionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for RegionReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let Some(target) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of region",
            ));
        };

        // Past-the-end seeks are allowed (reads then return 0), as for files
        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}
