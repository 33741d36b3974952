//! Hashing primitives used throughout the krait crates.
//!
//! Every artifact krait touches (repodata files, package archives, linked
//! files) is identified by one or more cryptographic digests. This crate
//! provides the digest type aliases, helpers to compute digests from files and
//! byte streams, and (de)serialization support for the hex representation used
//! in the on-disk JSON schemas.

pub use digest::{self, Digest, Output};
pub use md5::Md5;
pub use sha2::Sha256;

use std::{fs::File, io::Write, path::Path};

#[cfg(feature = "serde")]
pub mod serde;

#[cfg(feature = "tokio")]
pub mod tokio;

/// The output of a SHA256 digest.
pub type Sha256Hash = Output<Sha256>;

/// The output of an MD5 digest.
pub type Md5Hash = Output<Md5>;

/// Computes the digest of the file at the specified path.
pub fn compute_file_digest<D: Digest + Write>(path: impl AsRef<Path>) -> std::io::Result<Output<D>> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Computes the digest of the specified bytes.
pub fn compute_bytes_digest<D: Digest>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Parses a hex string into a digest output. Returns `None` if the string is
/// not valid hex or has the wrong length.
pub fn parse_digest_from_hex<D: Digest>(str: &str) -> Option<Output<D>> {
    let mut hash = Output::<D>::default();
    hex::decode_to_slice(str, &mut hash).ok().map(|()| hash)
}

/// A [`std::io::Write`] adapter that computes a digest of all bytes written
/// through it.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Wraps the given writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: D::new(),
        }
    }

    /// Returns the inner writer and the digest of everything written.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A [`std::io::Read`] adapter that computes a digest of all bytes read
/// through it.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Wraps the given reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: D::new(),
        }
    }

    /// Returns the inner reader and the digest of everything read.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: std::io::Read, D: Digest> std::io::Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }
}
