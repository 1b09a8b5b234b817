mod http;
mod local;

pub use http::HttpStorage;
pub use local::LocalStorage;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{FileObject, ServiceCategory};

#[derive(Debug, Error)]
pub enum StorageApiError {
    /// The server declined the file: size limit, type not allowed, quota.
    #[error("Upload rejected: {reason}")]
    Rejected { reason: String },
    /// Transport failure mid-stream.
    #[error("Transfer interrupted: {0}")]
    Interrupted(String),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageApiError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, StorageApiError::Rejected { .. })
    }
}

/// Request to register a new upload.
#[derive(Debug, Clone, Serialize)]
pub struct CreateUpload {
    pub organization_id: String,
    pub service: ServiceCategory,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    /// Part layout planned by the client; the backend echoes it back with
    /// destinations attached.
    pub parts: Vec<PartSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartSpec {
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Where the bytes go: the server-issued file id plus one destination per
/// planned part.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadTarget {
    pub file_id: String,
    pub parts: Vec<PartTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartTarget {
    pub number: u32,
    pub offset: u64,
    pub len: u64,
    /// Presigned destination URL; `None` for backends that take bytes
    /// directly.
    #[serde(default)]
    pub url: Option<String>,
}

/// Proof that one part landed, collected for the completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartReceipt {
    pub number: u32,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub checksum_sha256: Option<String>,
}

/// Split a file into sequential parts of at most `part_size` bytes.
/// Zero-byte files still get a single empty part so the protocol shape
/// holds.
pub fn plan_parts(size: u64, part_size: u64) -> Vec<PartSpec> {
    debug_assert!(part_size > 0, "part size must be positive");
    if size == 0 {
        return vec![PartSpec {
            number: 1,
            offset: 0,
            len: 0,
        }];
    }
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let len = part_size.min(size - offset);
        parts.push(PartSpec {
            number,
            offset,
            len,
        });
        offset += len;
        number += 1;
    }
    parts
}

/// Abstraction over the object-storage upload collaborator:
/// request-a-destination, stream parts, confirm.
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Register the upload and obtain per-part destinations.
    async fn create_upload(&self, req: &CreateUpload) -> Result<UploadTarget, StorageApiError>;

    /// Send one part's bytes to its destination.
    async fn upload_part(
        &self,
        file_id: &str,
        part: &PartTarget,
        data: Bytes,
    ) -> Result<PartReceipt, StorageApiError>;

    /// Confirm all parts landed; the object becomes durable and the record
    /// flips to uploaded.
    async fn complete_upload(
        &self,
        file_id: &str,
        receipts: Vec<PartReceipt>,
    ) -> Result<FileObject, StorageApiError>;

    /// Discard a partially registered upload. Used on cancellation and on
    /// mid-stream failure; must be safe to call for ids that never finished
    /// registering.
    async fn abort_upload(&self, file_id: &str) -> Result<(), StorageApiError>;

    async fn get_file(&self, file_id: &str) -> Result<FileObject, StorageApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parts_exact_multiple() {
        let parts = plan_parts(16, 8);
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].offset, parts[0].len), (0, 8));
        assert_eq!((parts[1].offset, parts[1].len), (8, 8));
    }

    #[test]
    fn test_plan_parts_remainder() {
        let parts = plan_parts(20, 8);
        assert_eq!(parts.len(), 3);
        assert_eq!((parts[2].offset, parts[2].len), (16, 4));
        assert_eq!(parts[2].number, 3);
    }

    #[test]
    fn test_plan_parts_empty_file() {
        let parts = plan_parts(0, 8);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len, 0);
    }

    #[test]
    fn test_plan_parts_single() {
        let parts = plan_parts(5, 8);
        assert_eq!(parts.len(), 1);
        assert_eq!((parts[0].offset, parts[0].len), (0, 5));
    }
}
