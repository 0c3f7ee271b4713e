//! In-process content hashing
//!
//! Files are hashed in a single streaming pass with a fixed buffer. Two hash kinds are
//! supported: plain MD5 (S3, Swift and GCS integrity tokens) and the Dropbox content
//! hash (SHA-256 over the SHA-256 digests of consecutive 4 MiB blocks).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// Dropbox hashes content in blocks of this size
pub const DROPBOX_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Hash algorithm a backend uses for its remote content hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashKind {
    #[default]
    Md5,
    DropboxContentHash,
}

/// Raw MD5 digest of a buffer
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    let digest = Md5::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Lowercase hex MD5, as Swift and S3 report it in ETags
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5_digest(data))
}

/// Base64 MD5, as sent in a `Content-MD5` header
pub fn md5_base64(data: &[u8]) -> String {
    STANDARD.encode(md5_digest(data))
}

/// Convert a base64 MD5 (GCS `md5Hash`) to lowercase hex
pub fn base64_to_hex(value: &str) -> Option<String> {
    STANDARD.decode(value).ok().map(hex::encode)
}

/// Incremental Dropbox content hasher
#[derive(Default)]
pub struct DropboxHasher {
    overall: Sha256,
    block: Sha256,
    block_len: usize,
}

impl DropboxHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = DROPBOX_BLOCK_SIZE - self.block_len;
            let take = room.min(data.len());
            self.block.update(&data[..take]);
            self.block_len += take;
            data = &data[take..];

            if self.block_len == DROPBOX_BLOCK_SIZE {
                let finished = std::mem::take(&mut self.block).finalize();
                self.overall.update(finished);
                self.block_len = 0;
            }
        }
    }

    pub fn finalize_hex(mut self) -> String {
        if self.block_len > 0 {
            let finished = self.block.finalize();
            self.overall.update(finished);
        }
        hex::encode(self.overall.finalize())
    }
}

/// Dropbox content hash of an in-memory buffer
pub fn dropbox_content_hash(data: &[u8]) -> String {
    let mut hasher = DropboxHasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash a whole file in one streaming pass
pub fn file_content_hash(path: &Path, kind: HashKind) -> io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    match kind {
        HashKind::Md5 => {
            let mut hasher = Md5::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashKind::DropboxContentHash => {
            let mut hasher = DropboxHasher::new();
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hasher.finalize_hex())
        }
    }
}

/// Base64 MD5 of a whole file, for single-shot `Content-MD5` headers
pub fn file_md5_base64(path: &Path) -> io::Result<String> {
    let hex_digest = file_content_hash(path, HashKind::Md5)?;
    let raw = hex::decode(hex_digest).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(STANDARD.encode(raw))
}
