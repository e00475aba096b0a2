//! Cryptographic primitives and the chunked encryption stream layer.
//!
//! Provides:
//! - AES-256-GCM file-key type with zeroing drop
//! - User-key cipher selection (AES-128/192/256-GCM)
//! - `CipherWriter` / `CipherReader`: authenticated encryption over a byte
//!   stream, sealed in fixed-size chunks with deterministic per-chunk nonces
//!
//! The nonce for chunk index `j` is the 96-bit big-endian encoding of `j`,
//! zero-padded on the left. The file key is freshly random per encoded
//! object and chunk indices are dense from zero, so each (key, nonce) pair
//! is used exactly once. Readers derive the chunk index from the downstream
//! cursor position, never from a free-running counter that could desync
//! after a seek.

use crate::error::{Result, StitchError};
use aes::Aes192;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Key, Nonce};
use rand::RngCore;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// AES-256-GCM file key.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(StitchError::InvalidKeyLength(slice.len()));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// AES-GCM cipher selected by user-key length. The caller-supplied key may
/// be 16, 24, or 32 bytes; the file key is always 32.
pub(crate) enum GcmCipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl GcmCipher {
    /// Select a cipher from a raw key.
    pub fn new(key: &[u8]) -> Result<Self> {
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(Aes128Gcm::new(
                Key::<Aes128Gcm>::from_slice(key),
            )))),
            24 => Ok(Self::Aes192(Box::new(Aes192Gcm::new(
                Key::<Aes192Gcm>::from_slice(key),
            )))),
            32 => Ok(Self::Aes256(Box::new(Aes256Gcm::new(
                Key::<Aes256Gcm>::from_slice(key),
            )))),
            n => Err(StitchError::InvalidKeyLength(n)),
        }
    }

    /// Seal `plaintext` under the given 96-bit nonce.
    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(StitchError::InvalidIvLength(nonce.len()));
        }
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| StitchError::EncryptionFailed)
    }

    /// Open `ciphertext` under the given 96-bit nonce.
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(StitchError::InvalidIvLength(nonce.len()));
        }
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, ciphertext),
            Self::Aes192(c) => c.decrypt(nonce, ciphertext),
            Self::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .map_err(|_| StitchError::DecryptionFailed)
    }
}

/// The nonce for chunk `index`: 96-bit big-endian, zero-padded on the left.
fn chunk_nonce(index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Seals a plaintext stream into fixed-size AES-256-GCM chunks and writes
/// the ciphertext to the downstream sink.
pub struct CipherWriter<W> {
    dst: W,
    cipher: Aes256Gcm,
    chunk_size: usize,
    buffer: Vec<u8>,
    /// Plaintext bytes consumed, pre-padding.
    plaintext: u64,
    /// Ciphertext bytes emitted downstream.
    ciphertext: u64,
}

impl<W: Write> CipherWriter<W> {
    /// Create a new writer sealing `chunk_size` plaintext bytes per chunk.
    pub fn new(dst: W, key: &EncryptionKey, chunk_size: usize) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self {
            dst,
            cipher,
            chunk_size,
            buffer: Vec::new(),
            plaintext: 0,
            ciphertext: 0,
        }
    }

    /// Plaintext bytes consumed so far, excluding padding.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext
    }

    /// Ciphertext bytes emitted so far.
    pub fn ciphertext_len(&self) -> u64 {
        self.ciphertext
    }

    fn seal_chunk(&mut self, start: usize) -> io::Result<()> {
        let index = self.ciphertext / (self.chunk_size + TAG_SIZE) as u64;
        let nonce = chunk_nonce(index);
        let chunk = &self.buffer[start..start + self.chunk_size];
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), chunk)
            .map_err(|_| StitchError::EncryptionFailed)?;
        self.dst.write_all(&sealed)?;
        self.ciphertext += sealed.len() as u64;
        Ok(())
    }

    /// Seal any residual plaintext (padded with random bytes to a whole
    /// chunk) and return the (plaintext, ciphertext) byte counters. The
    /// plaintext counter excludes the padding; the caller records it as the
    /// length bound for the read path.
    pub fn finish(mut self) -> Result<(u64, u64)> {
        if !self.buffer.is_empty() {
            let pad = self.chunk_size - self.buffer.len();
            let mut padding = vec![0u8; pad];
            OsRng.fill_bytes(&mut padding);
            self.buffer.extend_from_slice(&padding);
            self.seal_chunk(0)?;
        }
        self.dst.flush()?;
        Ok((self.plaintext, self.ciphertext))
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(p);
        self.plaintext += p.len() as u64;

        let mut off = 0;
        while self.buffer.len() - off >= self.chunk_size {
            self.seal_chunk(off)?;
            off += self.chunk_size;
        }
        self.buffer.drain(..off);

        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}

/// Plaintext view over a chunked AES-256-GCM ciphertext stream.
///
/// The view has the exact plaintext length recorded at encode time; the
/// random padding sealed into the final chunk is never exposed.
pub struct CipherReader<R> {
    ds: R,
    cipher: Aes256Gcm,
    chunk_size: usize,
    plaintext_size: u64,
    /// Position in the plaintext view.
    cursor: u64,
    /// Bytes to drop from the head of the next decrypted chunk after a seek.
    bytes_to_discard: u64,
    pending: Vec<u8>,
    pending_off: usize,
    pending_end: usize,
}

impl<R> std::fmt::Debug for CipherReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherReader")
            .field("chunk_size", &self.chunk_size)
            .field("plaintext_size", &self.plaintext_size)
            .field("cursor", &self.cursor)
            .field("bytes_to_discard", &self.bytes_to_discard)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek> CipherReader<R> {
    /// Create a plaintext view of length `plaintext_size` over `ds`.
    pub fn new(ds: R, key: &EncryptionKey, chunk_size: usize, plaintext_size: u64) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self {
            ds,
            cipher,
            chunk_size,
            plaintext_size,
            cursor: 0,
            bytes_to_discard: 0,
            pending: Vec::new(),
            pending_off: 0,
            pending_end: 0,
        }
    }

    /// Read and decrypt the next whole chunk from the downstream stream.
    fn fill_pending(&mut self) -> io::Result<()> {
        let sealed_size = self.chunk_size + TAG_SIZE;

        // The chunk index is a pure function of the downstream cursor.
        let pos = self.ds.stream_position()?;
        let index = pos / sealed_size as u64;

        let mut sealed = vec![0u8; sealed_size];
        self.ds.read_exact(&mut sealed).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::from(StitchError::ShortRead {
                    expected: sealed_size,
                    actual: 0,
                })
            } else {
                e
            }
        })?;

        let nonce = chunk_nonce(index);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| StitchError::DecryptionFailed)?;

        let chunk_base = index * self.chunk_size as u64;
        let mut start = self.bytes_to_discard as usize;
        self.bytes_to_discard = 0;

        // Truncate so the plaintext view never exceeds its recorded length.
        let mut end = plain.len();
        if chunk_base + end as u64 > self.plaintext_size {
            end = (self.plaintext_size - chunk_base) as usize;
        }
        start = start.min(end);

        self.pending = plain;
        self.pending_off = start;
        self.pending_end = end;
        Ok(())
    }
}

impl<R: Read + Seek> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.cursor >= self.plaintext_size {
            return Ok(0);
        }
        if self.pending_off >= self.pending_end {
            self.fill_pending()?;
            if self.pending_off >= self.pending_end {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending_end - self.pending_off);
        buf[..n].copy_from_slice(&self.pending[self.pending_off..self.pending_off + n]);
        self.pending_off += n;
        self.cursor += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for CipherReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.cursor as i64 + d,
            SeekFrom::End(d) => self.plaintext_size as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = target as u64;

        let index = target / self.chunk_size as u64;
        self.bytes_to_discard = target - index * self.chunk_size as u64;
        self.ds
            .seek(SeekFrom::Start(index * (self.chunk_size + TAG_SIZE) as u64))?;

        self.cursor = target;
        self.pending.clear();
        self.pending_off = 0;
        self.pending_end = 0;
        Ok(target)
    }
}
