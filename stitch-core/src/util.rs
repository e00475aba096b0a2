//! Stream adapters shared across the pipeline layers.
//!
//! Every layer of the pipeline consumes and produces the same capability: a
//! sized, random-access byte source. This module provides the adapters that
//! glue the layers together:
//! - `ReadSeek` - the capability trait itself
//! - `OffsetReader` - presents a region of a stream as if it started at zero
//! - `LimitReader` - caps a stream to a fixed logical length
//! - `ZeroReadSeeker` - a sized all-zero source standing in for missing shards
//! - `Truncate` - optional length-truncation capability used by finalization

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// A sized, random-access byte source. Blanket-implemented for every
/// `Read + Seek` type so pipeline layers compose freely.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Resources that support cutting their length. Used when a shard trailer is
/// promoted into the header region and the trailing copy should be removed.
/// Truncation is best-effort; readers never rely on the trailer being gone.
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

/// Wraps a `ReadSeek` and adds a constant offset to every absolute seek,
/// passing reads straight through. Used to present the data region of a
/// shard as if it started at zero.
#[derive(Debug)]
pub struct OffsetReader<R> {
    inner: R,
    offset: u64,
}

impl<R: ReadSeek> OffsetReader<R> {
    /// Create a new OffsetReader shifting all absolute positions by `offset`.
    pub fn new(inner: R, offset: u64) -> Self {
        Self { inner, offset }
    }
}

impl<R: ReadSeek> Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: ReadSeek> Seek for OffsetReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let inner_pos = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(self.offset + n))?,
            other => self.inner.seek(other)?,
        };
        Ok(inner_pos.saturating_sub(self.offset))
    }
}

/// Wraps a `ReadSeek` and caps its logical length to `limit`. Reads past the
/// limit return end-of-stream; seeks from the end are resolved against the
/// limit rather than the underlying stream length.
#[derive(Debug)]
pub struct LimitReader<R> {
    inner: R,
    limit: u64,
    pos: u64,
}

impl<R: ReadSeek> LimitReader<R> {
    /// Create a new LimitReader with the given logical length.
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            pos: 0,
        }
    }

    /// The logical length of this stream.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Consume the adapter and return the wrapped stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Access the wrapped stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

impl<R: ReadSeek> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.limit {
            return Ok(0);
        }
        let want = buf.len().min((self.limit - self.pos) as usize);
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: ReadSeek> Seek for LimitReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.limit as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.pos = self.inner.seek(SeekFrom::Start(target as u64))?;
        Ok(self.pos)
    }
}

/// A sized, seekable source returning all-zero bytes up to its configured
/// length. Stands in for missing shards during decode so that the erasure
/// layer sees hash mismatches at every stripe and treats the shard's blocks
/// as erasures, uniformly with corruption.
#[derive(Debug)]
pub struct ZeroReadSeeker {
    size: u64,
    cursor: u64,
}

impl ZeroReadSeeker {
    /// Create a new all-zero source of the given size.
    pub fn new(size: u64) -> Self {
        Self { size, cursor: 0 }
    }
}

impl Read for ZeroReadSeeker {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor >= self.size {
            return Ok(0);
        }
        let n = buf.len().min((self.size - self.cursor) as usize);
        buf[..n].fill(0);
        self.cursor += n as u64;
        Ok(n)
    }
}

impl Seek for ZeroReadSeeker {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.cursor as i64 + d,
            SeekFrom::End(d) => self.size as i64 + d,
        };
        self.cursor = target.clamp(0, self.size as i64) as u64;
        Ok(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_reader_shifts_absolute_seeks() {
        let data: Vec<u8> = (0..64).collect();
        let mut reader = OffsetReader::new(Cursor::new(data), 16);

        let pos = reader.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(pos, 0);

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [16, 17, 18, 19]);

        reader.seek(SeekFrom::Start(8)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [24, 25, 26, 27]);
    }

    #[test]
    fn test_limit_reader_caps_length() {
        let data: Vec<u8> = (0..64).collect();
        let mut reader = LimitReader::new(Cursor::new(data), 10);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out, (0..10).collect::<Vec<u8>>());

        // Reads past the limit return EOF.
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_limit_reader_seek_from_end() {
        let data: Vec<u8> = (0..64).collect();
        let mut reader = LimitReader::new(Cursor::new(data), 10);

        // End-relative seeks resolve against the limit, not the stream.
        let pos = reader.seek(SeekFrom::End(-3)).unwrap();
        assert_eq!(pos, 7);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![7, 8, 9]);
    }

    #[test]
    fn test_limit_reader_seek_before_start() {
        let mut reader = LimitReader::new(Cursor::new(vec![0u8; 8]), 8);
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_zero_read_seeker() {
        let mut zero = ZeroReadSeeker::new(10);

        let mut out = Vec::new();
        zero.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![0u8; 10]);

        // Seeks clamp to [0, size].
        assert_eq!(zero.seek(SeekFrom::Start(100)).unwrap(), 10);
        assert_eq!(zero.seek(SeekFrom::Current(-25)).unwrap(), 0);
        assert_eq!(zero.seek(SeekFrom::End(-4)).unwrap(), 6);

        let mut buf = [1u8; 8];
        let n = zero.read(&mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_cursor_truncate() {
        let mut cur = Cursor::new(vec![1u8; 32]);
        cur.truncate(8).unwrap();
        assert_eq!(cur.get_ref().len(), 8);
    }
}
