//! Optional symmetric encryption of request and response bodies.
//!
//! Bodies are sealed with AES-256-GCM using a chunked stream layout so that
//! neither side has to buffer a whole payload:
//!
//! ```text
//! nonce prefix (7 bytes)
//! frame*: ciphertext length (u32, big endian) ‖ ciphertext (plaintext + 16 byte tag)
//! ```
//!
//! Each frame's nonce is `prefix ‖ counter (u32 BE) ‖ last flag`. The last
//! flag is authenticated, so a stream cut at a frame boundary fails to
//! decrypt instead of silently yielding a prefix of the plaintext.

use std::fmt;
use std::io::{self, Read, Write};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the random nonce prefix written at the start of a stream.
pub const NONCE_PREFIX_LEN: usize = 7;

/// Maximum plaintext carried by one frame.
pub const FRAME_PLAINTEXT_LIMIT: usize = 16 * 1024;

const TAG_LEN: usize = 16;
const FRAME_CIPHERTEXT_LIMIT: usize = FRAME_PLAINTEXT_LIMIT + TAG_LEN;
const NONCE_LEN: usize = 12;

/// Shared AES-256 key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes a base64-encoded 32 byte key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the text is not base64 or has the wrong
    /// length.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|error| KeyError::Encoding(error.to_string()))?;
        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|raw: Vec<u8>| KeyError::Length(raw.len()))?;
        Ok(Self(bytes))
    }

    /// Derives a key from a shared secret with SHA-256.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Empty`] for a blank secret.
    pub fn derive(secret: &str) -> Result<Self, KeyError> {
        if secret.trim().is_empty() {
            return Err(KeyError::Empty);
        }
        let digest = Sha256::digest(secret.as_bytes());
        let mut bytes = [0_u8; KEY_LEN];
        bytes.copy_from_slice(digest.as_slice());
        Ok(Self(bytes))
    }

    /// Accepts either a base64 32 byte key or an arbitrary shared secret.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Empty`] for a blank value.
    pub fn parse(value: &str) -> Result<Self, KeyError> {
        Self::from_base64(value).or_else(|_| Self::derive(value))
    }

    /// Encodes the key as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    fn cipher(&self) -> io::Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid key length"))
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("SymmetricKey(..)")
    }
}

/// Raised when key material cannot be turned into a [`SymmetricKey`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Key text was not valid base64.
    #[error("encryption key is not valid base64: {0}")]
    Encoding(String),
    /// Decoded key had the wrong length.
    #[error("encryption key must be 32 bytes, got {0}")]
    Length(usize),
    /// No key material was supplied.
    #[error("encryption key must not be empty")]
    Empty,
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, last: bool) -> [u8; NONCE_LEN] {
    let mut nonce = [0_u8; NONCE_LEN];
    let (head, tail) = nonce.split_at_mut(NONCE_PREFIX_LEN);
    head.copy_from_slice(prefix);
    let (count, flag) = tail.split_at_mut(4);
    count.copy_from_slice(&counter.to_be_bytes());
    if let Some(byte) = flag.first_mut() {
        *byte = u8::from(last);
    }
    nonce
}

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "encrypted stream truncated")
}

/// Encrypting writer.
///
/// Plaintext is buffered into frames of at most [`FRAME_PLAINTEXT_LIMIT`]
/// bytes. [`Write::flush`] seals whatever is buffered as a non-final frame;
/// [`EncryptWriter::finish`] must be called to seal the final frame.
pub struct EncryptWriter<W: Write> {
    inner: W,
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_PREFIX_LEN],
    counter: u32,
    buffer: Vec<u8>,
    header_written: bool,
}

impl<W: Write> EncryptWriter<W> {
    /// Starts a new encrypted stream with a random nonce prefix.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cipher cannot be initialised.
    pub fn new(key: &SymmetricKey, inner: W) -> io::Result<Self> {
        let mut prefix = [0_u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);
        Ok(Self {
            inner,
            cipher: key.cipher()?,
            prefix,
            counter: 0,
            buffer: Vec::with_capacity(FRAME_PLAINTEXT_LIMIT),
            header_written: false,
        })
    }

    /// Borrows the underlying sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Seals the final frame and returns the underlying sink.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if sealing or writing fails.
    pub fn finish(mut self) -> io::Result<W> {
        self.seal(true)?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn seal(&mut self, last: bool) -> io::Result<()> {
        if !self.header_written {
            self.inner.write_all(&self.prefix)?;
            self.header_written = true;
        }
        let nonce = frame_nonce(&self.prefix, self.counter, last);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), self.buffer.as_slice())
            .map_err(|_| io::Error::other("frame encryption failed"))?;
        let length = u32::try_from(ciphertext.len()).map_err(|_| invalid("frame too large"))?;
        self.inner.write_all(&length.to_be_bytes())?;
        self.inner.write_all(&ciphertext)?;
        self.buffer.clear();
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| io::Error::other("encrypted stream exceeded frame limit"))?;
        Ok(())
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        // A full frame is only sealed once more data arrives; the last frame
        // is decided by `finish`.
        if self.buffer.len() == FRAME_PLAINTEXT_LIMIT {
            self.seal(false)?;
        }
        let room = FRAME_PLAINTEXT_LIMIT - self.buffer.len();
        let taken = room.min(data.len());
        self.buffer.extend_from_slice(data.get(..taken).unwrap_or_default());
        Ok(taken)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.seal(false)?;
        }
        self.inner.flush()
    }
}

impl<W: Write> fmt::Debug for EncryptWriter<W> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EncryptWriter")
            .field("counter", &self.counter)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Decrypting reader for streams produced by [`EncryptWriter`].
///
/// A stream that ends before its final frame yields
/// [`io::ErrorKind::UnexpectedEof`]; tampered frames and trailing bytes yield
/// [`io::ErrorKind::InvalidData`]. Once a read fails every later read fails
/// with the same kind.
pub struct DecryptReader<R: Read> {
    inner: R,
    cipher: Aes256Gcm,
    prefix: Option<[u8; NONCE_PREFIX_LEN]>,
    counter: u32,
    plaintext: Vec<u8>,
    position: usize,
    finished: bool,
    failed: Option<io::ErrorKind>,
}

impl<R: Read> DecryptReader<R> {
    /// Wraps an encrypted source.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the cipher cannot be initialised.
    pub fn new(key: &SymmetricKey, inner: R) -> io::Result<Self> {
        Ok(Self {
            inner,
            cipher: key.cipher()?,
            prefix: None,
            counter: 0,
            plaintext: Vec::new(),
            position: 0,
            finished: false,
            failed: None,
        })
    }

    /// Drains any remaining plaintext and verifies the stream is complete.
    ///
    /// Decoders may stop reading as soon as a value is complete; calling
    /// `finish` afterwards still detects truncation and trailing data.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the stream is truncated or corrupt.
    pub fn finish(mut self) -> io::Result<R> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(self.inner)
    }

    fn read_prefix(&mut self) -> io::Result<[u8; NONCE_PREFIX_LEN]> {
        if let Some(prefix) = self.prefix {
            return Ok(prefix);
        }
        let mut prefix = [0_u8; NONCE_PREFIX_LEN];
        read_exact_or_truncated(&mut self.inner, &mut prefix)?;
        self.prefix = Some(prefix);
        Ok(prefix)
    }

    fn next_frame(&mut self) -> io::Result<()> {
        let prefix = self.read_prefix()?;
        let mut length = [0_u8; 4];
        read_exact_or_truncated(&mut self.inner, &mut length)?;
        let length = usize::try_from(u32::from_be_bytes(length))
            .map_err(|_| invalid("encrypted frame too large"))?;
        if !(TAG_LEN..=FRAME_CIPHERTEXT_LIMIT).contains(&length) {
            return Err(invalid("encrypted frame has an invalid length"));
        }
        let mut ciphertext = vec![0_u8; length];
        read_exact_or_truncated(&mut self.inner, &mut ciphertext)?;

        let (plaintext, last) = self.open_frame(&prefix, &ciphertext)?;
        self.plaintext = plaintext;
        self.position = 0;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| invalid("encrypted stream exceeded frame limit"))?;

        if last {
            self.finished = true;
            let mut trailing = [0_u8; 1];
            if self.inner.read(&mut trailing)? != 0 {
                return Err(invalid("unexpected data after final encrypted frame"));
            }
        }
        Ok(())
    }

    fn open_frame(
        &self,
        prefix: &[u8; NONCE_PREFIX_LEN],
        ciphertext: &[u8],
    ) -> io::Result<(Vec<u8>, bool)> {
        for last in [false, true] {
            let nonce = frame_nonce(prefix, self.counter, last);
            if let Ok(plaintext) = self.cipher.decrypt(Nonce::from_slice(&nonce), ciphertext) {
                return Ok((plaintext, last));
            }
        }
        Err(invalid("encrypted frame failed authentication"))
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let pending = self.plaintext.get(self.position..).unwrap_or_default();
            if !pending.is_empty() {
                let count = pending.len().min(buf.len());
                if let (Some(target), Some(source)) = (buf.get_mut(..count), pending.get(..count)) {
                    target.copy_from_slice(source);
                }
                self.position += count;
                return Ok(count);
            }
            if self.finished {
                return Ok(0);
            }
            if let Some(kind) = self.failed {
                return Err(io::Error::new(kind, "encrypted stream already failed"));
            }
            if let Err(error) = self.next_frame() {
                self.failed = Some(error.kind());
                return Err(error);
            }
        }
    }
}

impl<R: Read> fmt::Debug for DecryptReader<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DecryptReader")
            .field("counter", &self.counter)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    reader.read_exact(buf).map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            truncated()
        } else {
            error
        }
    })
}

/// Encrypts a complete buffer in one call.
///
/// # Errors
///
/// Returns an I/O error if encryption fails.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> io::Result<Vec<u8>> {
    let mut writer = EncryptWriter::new(key, Vec::with_capacity(plaintext.len() + 64))?;
    writer.write_all(plaintext)?;
    writer.finish()
}

/// Decrypts a complete buffer in one call.
///
/// # Errors
///
/// Returns an I/O error if the input is truncated, tampered with or was
/// sealed with another key.
pub fn open(key: &SymmetricKey, ciphertext: &[u8]) -> io::Result<Vec<u8>> {
    let mut reader = DecryptReader::new(key, ciphertext)?;
    let mut plaintext = Vec::with_capacity(ciphertext.len());
    reader.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}
