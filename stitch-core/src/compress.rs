//! Streaming compression with a seekable frame index.
//!
//! The compressed stream is a sequence of independently decompressible zstd
//! frames followed by a seek table and a fixed footer:
//!
//! ```text
//! frame 0 | frame 1 | ... | frame K-1 | K * (c_len u32 LE, u_len u32 LE) | K u32 LE | magic u32 LE
//! ```
//!
//! Each frame compresses a fixed amount of plaintext (the last frame may be
//! short). The table maps plaintext offsets to frame boundaries, so the
//! reader can serve `Seek` by decompressing at most one frame. The reader
//! locates the footer from the known total length of its (length-bounded)
//! input stream.

use crate::error::{Result, StitchError};
use crate::util::ReadSeek;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Plaintext bytes per compressed frame.
pub const DEFAULT_FRAME_SIZE: usize = 128 * 1024;

/// zstd compression level used by the writer.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Magic closing the seek-table footer.
const SEEK_TABLE_MAGIC: u32 = 0x8F92_EAB1;

/// Footer: frame count (u32) + magic (u32).
const FOOTER_SIZE: u64 = 8;

/// Bytes per seek-table entry.
const ENTRY_SIZE: u64 = 8;

/// Compresses a plaintext stream into seekable frames.
pub struct CompressWriter<W> {
    dst: W,
    frame_size: usize,
    level: i32,
    buffer: Vec<u8>,
    /// (compressed, uncompressed) size per emitted frame.
    table: Vec<(u32, u32)>,
}

impl<W: Write> CompressWriter<W> {
    /// Create a new writer with the default frame size and level.
    pub fn new(dst: W) -> Self {
        Self::with_frame_size(dst, DEFAULT_FRAME_SIZE)
    }

    /// Create a new writer cutting frames of `frame_size` plaintext bytes.
    pub fn with_frame_size(dst: W, frame_size: usize) -> Self {
        Self {
            dst,
            frame_size,
            level: DEFAULT_COMPRESSION_LEVEL,
            buffer: Vec::new(),
            table: Vec::new(),
        }
    }

    fn emit_frame(&mut self, start: usize, len: usize) -> io::Result<()> {
        let frame = &self.buffer[start..start + len];
        let compressed = zstd::bulk::compress(frame, self.level)?;
        self.dst.write_all(&compressed)?;
        self.table.push((compressed.len() as u32, len as u32));
        Ok(())
    }

    /// Compress any residual plaintext, append the seek table and footer,
    /// and flush the downstream writer. Must be called before the layer
    /// below is closed.
    pub fn finish(mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let len = self.buffer.len();
            self.emit_frame(0, len)?;
        }
        for (compressed, uncompressed) in &self.table {
            self.dst.write_all(&compressed.to_le_bytes())?;
            self.dst.write_all(&uncompressed.to_le_bytes())?;
        }
        self.dst.write_all(&(self.table.len() as u32).to_le_bytes())?;
        self.dst.write_all(&SEEK_TABLE_MAGIC.to_le_bytes())?;
        self.dst.flush()?;
        Ok(())
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(p);

        let mut off = 0;
        while self.buffer.len() - off >= self.frame_size {
            self.emit_frame(off, self.frame_size)?;
            off += self.frame_size;
        }
        self.buffer.drain(..off);

        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}

/// One frame of the parsed seek table, with cumulative offsets.
#[derive(Debug)]
struct FrameInfo {
    compressed_offset: u64,
    compressed_len: u32,
    uncompressed_offset: u64,
    uncompressed_len: u32,
}

/// Plaintext view over a seekable compressed stream.
#[derive(Debug)]
pub struct CompressReader<R> {
    ds: R,
    frames: Vec<FrameInfo>,
    total_uncompressed: u64,
    cursor: u64,
    /// Decompressed contents of the most recently touched frame.
    current: Option<(usize, Vec<u8>)>,
}

impl<R: ReadSeek> CompressReader<R> {
    /// Parse the seek table from the tail of a compressed stream of
    /// `compressed_size` bytes and return a reader over its plaintext.
    pub fn new(mut ds: R, compressed_size: u64) -> Result<Self> {
        if compressed_size < FOOTER_SIZE {
            return Err(StitchError::InvalidSeekTable);
        }

        let mut footer = [0u8; FOOTER_SIZE as usize];
        ds.seek(SeekFrom::Start(compressed_size - FOOTER_SIZE))?;
        ds.read_exact(&mut footer)?;

        let count = u32::from_le_bytes(footer[0..4].try_into().unwrap()) as u64;
        let magic = u32::from_le_bytes(footer[4..8].try_into().unwrap());
        if magic != SEEK_TABLE_MAGIC {
            return Err(StitchError::InvalidSeekTable);
        }
        let table_size = count * ENTRY_SIZE;
        if table_size + FOOTER_SIZE > compressed_size {
            return Err(StitchError::InvalidSeekTable);
        }

        let mut table = vec![0u8; table_size as usize];
        ds.seek(SeekFrom::Start(compressed_size - FOOTER_SIZE - table_size))?;
        ds.read_exact(&mut table)?;

        let mut frames = Vec::with_capacity(count as usize);
        let mut compressed_offset = 0u64;
        let mut uncompressed_offset = 0u64;
        for entry in table.chunks_exact(ENTRY_SIZE as usize) {
            let compressed_len = u32::from_le_bytes(entry[0..4].try_into().unwrap());
            let uncompressed_len = u32::from_le_bytes(entry[4..8].try_into().unwrap());
            frames.push(FrameInfo {
                compressed_offset,
                compressed_len,
                uncompressed_offset,
                uncompressed_len,
            });
            compressed_offset += compressed_len as u64;
            uncompressed_offset += uncompressed_len as u64;
        }
        // The frames and the table must exactly fill the stream.
        if compressed_offset + table_size + FOOTER_SIZE != compressed_size {
            return Err(StitchError::InvalidSeekTable);
        }

        Ok(Self {
            ds,
            frames,
            total_uncompressed: uncompressed_offset,
            cursor: 0,
            current: None,
        })
    }

    /// Total plaintext length described by the seek table.
    pub fn uncompressed_len(&self) -> u64 {
        self.total_uncompressed
    }

    /// Index of the frame containing plaintext offset `pos`.
    fn frame_at(&self, pos: u64) -> usize {
        self.frames
            .partition_point(|f| f.uncompressed_offset + f.uncompressed_len as u64 <= pos)
    }

    fn load_frame(&mut self, idx: usize) -> io::Result<()> {
        if matches!(self.current, Some((cur, _)) if cur == idx) {
            return Ok(());
        }
        let frame = &self.frames[idx];
        let mut compressed = vec![0u8; frame.compressed_len as usize];
        self.ds.seek(SeekFrom::Start(frame.compressed_offset))?;
        self.ds.read_exact(&mut compressed)?;

        let plain = zstd::bulk::decompress(&compressed, frame.uncompressed_len as usize)?;
        if plain.len() != frame.uncompressed_len as usize {
            return Err(io::Error::from(StitchError::InvalidSeekTable));
        }
        self.current = Some((idx, plain));
        Ok(())
    }
}

impl<R: ReadSeek> Read for CompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.cursor >= self.total_uncompressed {
            return Ok(0);
        }
        let idx = self.frame_at(self.cursor);
        self.load_frame(idx)?;

        let frame_off = (self.cursor - self.frames[idx].uncompressed_offset) as usize;
        let Some((_, plain)) = &self.current else {
            return Err(io::Error::new(io::ErrorKind::Other, "frame cache empty"));
        };
        let n = buf.len().min(plain.len() - frame_off);
        buf[..n].copy_from_slice(&plain[frame_off..frame_off + n]);
        self.cursor += n as u64;
        Ok(n)
    }
}

impl<R: ReadSeek> Seek for CompressReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.cursor as i64 + d,
            SeekFrom::End(d) => self.total_uncompressed as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.cursor = target as u64;
        Ok(self.cursor)
    }
}
