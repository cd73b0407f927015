use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::{Hasher, Sha256Hasher};

/// Streaming reader that hashes data as it passes through.
pub struct VerifiedReader<R, H> {
    reader: R,
    hasher: H,
    bytes_read: u64,
}

impl<R, H> VerifiedReader<R, H> {
    pub fn new(reader: R, hasher: H) -> Self {
        Self {
            reader,
            hasher,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 { self.bytes_read }
}

impl<R: Read, H: Hasher> VerifiedReader<R, H> {
    /// Consume the reader, returning the digest and byte count.
    pub fn finish(self) -> (Vec<u8>, u64) { (self.hasher.finalize(), self.bytes_read) }
}

impl<R: Read, H: Hasher> Read for VerifiedReader<R, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes_read += n as u64;
        }
        Ok(n)
    }
}

/// SHA-256 and length of a file on disk.
pub fn sha256_file(path: impl AsRef<Path>) -> io::Result<(Vec<u8>, u64)> {
    let file = File::open(path)?;
    let mut reader = VerifiedReader::new(file, Sha256Hasher::new());
    io::copy(&mut reader, &mut io::sink())?;
    Ok(reader.finish())
}
