//! Content-addressed media store with BLAKE3 hashing
//!
//! Holds raw media bytes and oversized derived text (transcripts). The hash
//! doubles as the exact-duplicate content hash on source items.

use crate::error::{MemoraError, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Content-addressed media storage
pub struct MediaStore {
    base_path: PathBuf,
    compression_enabled: bool,
    compression_threshold: usize,
}

impl MediaStore {
    /// Create a new media store at the given base path
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let media_dir = base_path.join("media");
        fs::create_dir_all(&media_dir).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to create media directory: {}", media_dir.display()),
        })?;

        Ok(Self {
            base_path,
            compression_enabled: true,
            compression_threshold,
        })
    }

    /// Write raw media bytes verbatim, returning (hash, was_new)
    ///
    /// Media files are already compressed containers; only derived text goes
    /// through `write_text`.
    pub fn write(&self, data: &[u8]) -> Result<(String, bool)> {
        self.write_inner(data, false).map(|(h, _, n)| (h, n))
    }

    /// Write derived text (transcripts, OCR dumps), compressed above the threshold
    /// Returns (hash, was_compressed, was_new)
    pub fn write_text(&self, data: &[u8]) -> Result<(String, bool, bool)> {
        let compress = self.compression_enabled && data.len() >= self.compression_threshold;
        self.write_inner(data, compress)
    }

    fn write_inner(&self, data: &[u8], compress: bool) -> Result<(String, bool, bool)> {
        let hash = Self::hash_data(data);

        let blob_path = self.blob_path(&hash);
        if blob_path.exists() {
            return Ok((hash, false, false));
        }

        // Write to temporary file first (atomic write)
        let temp_path = self.temp_path(&hash);
        let parent = temp_path
            .parent()
            .ok_or_else(|| MemoraError::Config("Invalid media path".to_string()))?;
        fs::create_dir_all(parent).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to create media shard directory: {}", parent.display()),
        })?;

        let mut file = fs::File::create(&temp_path).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to create temp media file: {}", temp_path.display()),
        })?;

        if compress {
            let compressed = zstd::encode_all(data, 3).map_err(|e| MemoraError::Io {
                source: e,
                context: "Failed to compress media data".to_string(),
            })?;
            file.write_all(&compressed).map_err(|e| MemoraError::Io {
                source: e,
                context: format!("Failed to write compressed media: {}", temp_path.display()),
            })?;
        } else {
            file.write_all(data).map_err(|e| MemoraError::Io {
                source: e,
                context: format!("Failed to write media data: {}", temp_path.display()),
            })?;
        }

        file.sync_all().map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to sync media file: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &blob_path).map_err(|e| MemoraError::Io {
            source: e,
            context: format!(
                "Failed to rename temp media to final location: {} -> {}",
                temp_path.display(),
                blob_path.display()
            ),
        })?;

        Ok((hash, compress, true))
    }

    /// Read data from the media store
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(hash);

        if !blob_path.exists() {
            return Err(MemoraError::Config(format!("Media blob not found: {}", hash)));
        }

        let mut file = fs::File::open(&blob_path).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to open media file: {}", blob_path.display()),
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to read media data: {}", blob_path.display()),
        })?;

        // Compressed text blobs are zstd frames; raw media is returned as-is
        match zstd::decode_all(&data[..]) {
            Ok(decompressed) => Ok(decompressed),
            Err(_) => Ok(data),
        }
    }

    /// Check if a blob exists
    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Delete a blob (cascade from an explicit user item delete)
    pub fn delete(&self, hash: &str) -> Result<()> {
        let blob_path = self.blob_path(hash);
        if blob_path.exists() {
            fs::remove_file(&blob_path).map_err(|e| MemoraError::Io {
                source: e,
                context: format!("Failed to delete media blob: {}", blob_path.display()),
            })?;
        }
        Ok(())
    }

    /// Get the stored size of a blob
    pub fn size(&self, hash: &str) -> Result<u64> {
        let blob_path = self.blob_path(hash);
        let metadata = fs::metadata(&blob_path).map_err(|e| MemoraError::Io {
            source: e,
            context: format!("Failed to get media metadata: {}", blob_path.display()),
        })?;
        Ok(metadata.len())
    }

    /// Hash data using BLAKE3
    pub fn hash_data(data: &[u8]) -> String {
        let hash = blake3::hash(data);
        // 32 hex characters (16 bytes) is plenty for uniqueness here
        format!("{:.32}", hash.to_hex())
    }

    /// Two-level sharding: media/ab/cd/abcdef123456...
    fn blob_path(&self, hash: &str) -> PathBuf {
        let shard1 = &hash[0..2];
        let shard2 = &hash[2..4];
        self.base_path
            .join("media")
            .join(shard1)
            .join(shard2)
            .join(hash)
    }

    fn temp_path(&self, hash: &str) -> PathBuf {
        let shard1 = &hash[0..2];
        let shard2 = &hash[2..4];
        self.base_path
            .join("media")
            .join(shard1)
            .join(shard2)
            .join(format!("{}.tmp", hash))
    }
}
