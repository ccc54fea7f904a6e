//! Whole-database backup archives.
//!
//! An archive is a JSON document holding a manifest and the hex-encoded
//! export blob, written as a gzip stream. The manifest records a SHA-256 of
//! the blob so a damaged archive is detected before it reaches a database.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::BackupError;
use crate::transport::Transport;

/// Current archive format version.
pub const FORMAT_VERSION: u32 = 1;

/// Archive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// When the export was taken.
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the export blob, lowercase hex.
    pub sha256: String,
    /// Length of the export blob in bytes.
    pub size: u64,
    pub format_version: u32,
}

/// An exported database and its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupArchive {
    pub manifest: BackupManifest,
    /// The export blob, hex encoded.
    data: String,
}

impl BackupArchive {
    /// Wrap an export blob.
    pub fn new(data: Vec<u8>) -> Self {
        let manifest = BackupManifest {
            created_at: Utc::now(),
            sha256: compute_sha256(&data),
            size: data.len() as u64,
            format_version: FORMAT_VERSION,
        };
        Self {
            manifest,
            data: hex::encode(data),
        }
    }

    /// Export a database.
    pub async fn capture(transport: &dyn Transport) -> Result<Self, BackupError> {
        let data = transport.export().await?;
        let archive = Self::new(data);
        info!(
            size = archive.manifest.size,
            sha256 = %archive.manifest.sha256,
            "Captured backup"
        );
        Ok(archive)
    }

    /// The export blob.
    pub fn data(&self) -> Result<Vec<u8>, BackupError> {
        hex::decode(&self.data).map_err(|e| BackupError::Malformed(e.to_string()))
    }

    /// Check the blob against the manifest.
    pub fn verify(&self) -> Result<(), BackupError> {
        let data = self.data()?;
        let actual = compute_sha256(&data);
        if actual != self.manifest.sha256 {
            return Err(BackupError::ChecksumMismatch {
                expected: self.manifest.sha256.clone(),
                actual,
            });
        }
        if data.len() as u64 != self.manifest.size {
            return Err(BackupError::Malformed(format!(
                "size {} does not match manifest size {}",
                data.len(),
                self.manifest.size
            )));
        }
        Ok(())
    }

    /// Write the archive as a gzip stream.
    pub fn write_to(&self, path: &Path) -> Result<(), BackupError> {
        let file = File::create(path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, self)
            .map_err(|e| BackupError::Malformed(e.to_string()))?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    /// Read an archive written by [`write_to`](Self::write_to) and verify it.
    pub fn read_from(path: &Path) -> Result<Self, BackupError> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        let archive: BackupArchive =
            serde_json::from_slice(&json).map_err(|e| BackupError::Malformed(e.to_string()))?;
        if archive.manifest.format_version != FORMAT_VERSION {
            return Err(BackupError::Malformed(format!(
                "unsupported format version {}",
                archive.manifest.format_version
            )));
        }
        archive.verify()?;
        Ok(archive)
    }

    /// Replace a database's contents with this archive.
    pub async fn restore(&self, transport: &dyn Transport) -> Result<(), BackupError> {
        self.verify()?;
        if !transport.import(self.data()?).await? {
            warn!(sha256 = %self.manifest.sha256, "Backup rejected");
            return Err(BackupError::Rejected);
        }
        info!(size = self.manifest.size, "Restored backup");
        Ok(())
    }
}

/// SHA-256 of bytes, lowercase hex.
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use karmasync_proto::{Model, Value};
    use tempfile::tempdir;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            compute_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_write_and_read_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.backup");
        let archive = BackupArchive::new(b"{\"hello\": 1}".to_vec());
        archive.write_to(&path).unwrap();

        let read = BackupArchive::read_from(&path).unwrap();
        assert_eq!(read, archive);
        assert_eq!(read.data().unwrap(), b"{\"hello\": 1}".to_vec());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut archive = BackupArchive::new(b"payload".to_vec());
        archive.data = hex::encode(b"tampered");
        match archive.verify() {
            Err(BackupError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, compute_sha256(b"payload"));
                assert_eq!(actual, compute_sha256(b"tampered"));
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage");
        std::fs::write(&path, b"not gzip").unwrap();
        assert!(BackupArchive::read_from(&path).is_err());
    }

    #[tokio::test]
    async fn test_capture_and_restore() {
        let db = MemoryDatabase::new();
        let notes = db.define(&Model::structure([("text", Model::String)])).unwrap();
        db.insert(&notes, Value::structure([("text", Value::from("hi"))]))
            .unwrap();
        let archive = BackupArchive::capture(&db).await.unwrap();

        let restored = MemoryDatabase::new();
        archive.restore(&restored).await.unwrap();
        assert_eq!(restored.meta_id(), db.meta_id());
        assert_eq!(restored.records(&notes).len(), 1);
    }

    #[tokio::test]
    async fn test_restore_rejected() {
        let db = MemoryDatabase::new();
        let archive = BackupArchive::new(b"not a snapshot".to_vec());
        let err = archive.restore(&db).await.unwrap_err();
        assert!(matches!(err, BackupError::Rejected));
    }
}
