// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Where received payload goes and where transmitted payload comes from

use std::io::{ErrorKind, Read, Write};

/// Consumer of received payload, called once per newly accepted block
pub trait ChunkSink {
    fn store(&mut self, chunk: &[u8]) -> std::io::Result<()>;
}

/// Producer of payload to transmit, called once per block.
/// Returning fewer bytes than `buf.len()` signals end of data.
pub trait ChunkSource {
    fn fetch(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

// ============================================================================
// Raw Buffer Variants
// ============================================================================

impl ChunkSink for Vec<u8> {
    fn store(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Transmit straight out of an in-memory buffer
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }
}

impl ChunkSource for SliceSource<'_> {
    fn fetch(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

// ============================================================================
// Stream Variants
// ============================================================================

/// Store received blocks into any writer (usually a file)
pub struct WriteSink<W: Write> {
    inner: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(inner: W) -> Self {
        WriteSink { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ChunkSink for WriteSink<W> {
    fn store(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(chunk)
    }
}

/// Fetch blocks from any reader (usually a file)
pub struct ReadSource<R: Read> {
    inner: R,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        ReadSource { inner }
    }
}

impl<R: Read> ChunkSource for ReadSource<R> {
    // A short read from a file or pipe is not end of data, so keep reading
    fn fetch(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}
