//! SHA-256 hashing primitives shared by fingerprints and identities

use kiln_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// A 256-bit content hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashCode([u8; 32]);

impl HashCode {
    /// Hash a byte slice directly
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Parse a lowercase or uppercase hex string of 64 characters
    pub fn from_hex(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| Error::serialization(format!("invalid hash '{value}': {e}")))?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::serialization(format!("invalid hash '{value}': expected 32 bytes"))
        })?;
        Ok(Self(array))
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw bytes of the hash
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HashCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashCode({})", &self.to_hex()[..12])
    }
}

/// Incremental hasher over typed fields
///
/// Every variable-length field is length-prefixed, so `("ab", "c")` and
/// `("a", "bc")` never hash alike.
#[derive(Debug, Clone, Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    /// Create a new hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a string field
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Hash a byte field
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.inner.update((value.len() as u64).to_le_bytes());
        self.inner.update(value);
        self
    }

    /// Hash another hash
    pub fn put_hash(&mut self, value: &HashCode) -> &mut Self {
        self.inner.update(value.as_bytes());
        self
    }

    /// Hash an integer field
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_le_bytes());
        self
    }

    /// Finish and produce the hash
    pub fn finish(self) -> HashCode {
        HashCode(self.inner.finalize().into())
    }
}

/// Compute the SHA-256 hash of a file's content using streaming
pub fn hash_file(file_path: &Path) -> Result<HashCode> {
    let file = File::open(file_path)
        .map_err(|e| Error::file_system(file_path, "open file for hashing", e))?;

    let mut reader = BufReader::with_capacity(8192, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| Error::file_system(file_path, "read file chunk for hashing", e))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(HashCode(hasher.finalize().into()))
}
