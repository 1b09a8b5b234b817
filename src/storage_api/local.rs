use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{CreateUpload, PartReceipt, PartTarget, StorageApi, StorageApiError, UploadTarget};
use crate::model::FileObject;

struct PendingUpload {
    meta: CreateUpload,
    staging_dir: PathBuf,
    received: HashMap<u32, u64>,
}

/// Local filesystem backend for development and testing.
///
/// Parts are staged under `.staging/<file_id>/` and assembled into the final
/// object on completion, so an aborted upload never leaves a visible object
/// behind.
pub struct LocalStorage {
    base_path: PathBuf,
    max_object_size: u64,
    pending: Mutex<HashMap<String, PendingUpload>>,
    completed: Mutex<HashMap<String, FileObject>>,
}

impl LocalStorage {
    pub fn new<P: AsRef<Path>>(base_path: P, max_object_size: u64) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join(".staging"))?;
        Ok(Self {
            base_path,
            max_object_size,
            pending: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
        })
    }

    fn object_path(&self, file_id: &str) -> PathBuf {
        self.base_path.join(file_id)
    }

    fn part_path(staging_dir: &Path, number: u32) -> PathBuf {
        staging_dir.join(format!("part-{number}"))
    }
}

#[async_trait]
impl StorageApi for LocalStorage {
    async fn create_upload(&self, req: &CreateUpload) -> Result<UploadTarget, StorageApiError> {
        if req.size > self.max_object_size {
            return Err(StorageApiError::Rejected {
                reason: format!(
                    "file exceeds maximum size of {} bytes",
                    self.max_object_size
                ),
            });
        }

        let file_id = Uuid::new_v4().to_string();
        let staging_dir = self.base_path.join(".staging").join(&file_id);
        tokio::fs::create_dir_all(&staging_dir).await?;

        let parts = req
            .parts
            .iter()
            .map(|p| PartTarget {
                number: p.number,
                offset: p.offset,
                len: p.len,
                url: None,
            })
            .collect();

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.insert(
            file_id.clone(),
            PendingUpload {
                meta: req.clone(),
                staging_dir,
                received: HashMap::new(),
            },
        );

        Ok(UploadTarget { file_id, parts })
    }

    async fn upload_part(
        &self,
        file_id: &str,
        part: &PartTarget,
        data: Bytes,
    ) -> Result<PartReceipt, StorageApiError> {
        let staging_dir = {
            let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let upload = pending
                .get(file_id)
                .ok_or_else(|| StorageApiError::NotFound(file_id.to_string()))?;
            upload.staging_dir.clone()
        };

        if data.len() as u64 != part.len {
            return Err(StorageApiError::Backend(format!(
                "part {} carries {} bytes, expected {}",
                part.number,
                data.len(),
                part.len
            )));
        }

        let checksum = hex_digest(&data);
        tokio::fs::write(Self::part_path(&staging_dir, part.number), &data).await?;

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(upload) = pending.get_mut(file_id) {
            upload.received.insert(part.number, part.len);
        }

        Ok(PartReceipt {
            number: part.number,
            etag: None,
            checksum_sha256: Some(checksum),
        })
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        receipts: Vec<PartReceipt>,
    ) -> Result<FileObject, StorageApiError> {
        let upload = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending
                .remove(file_id)
                .ok_or_else(|| StorageApiError::NotFound(file_id.to_string()))?
        };

        let expected: Vec<u32> = upload.meta.parts.iter().map(|p| p.number).collect();
        let confirmed: Vec<u32> = receipts.iter().map(|r| r.number).collect();
        if expected
            .iter()
            .any(|n| !confirmed.contains(n) || !upload.received.contains_key(n))
        {
            // Put it back so abort can still clean up the staging area.
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(file_id.to_string(), upload);
            return Err(StorageApiError::Backend(format!(
                "completion missing parts for {file_id}"
            )));
        }

        let mut hasher = Sha256::new();
        let mut assembled = Vec::with_capacity(upload.meta.size as usize);
        let mut numbers = expected;
        numbers.sort_unstable();
        for number in numbers {
            let data = tokio::fs::read(Self::part_path(&upload.staging_dir, number)).await?;
            hasher.update(&data);
            assembled.extend_from_slice(&data);
        }

        tokio::fs::write(self.object_path(file_id), &assembled).await?;
        tokio::fs::remove_dir_all(&upload.staging_dir).await?;

        let file = FileObject {
            id: file_id.to_string(),
            organization_id: upload.meta.organization_id.clone(),
            name: upload.meta.name.clone(),
            mime_type: upload.meta.mime_type.clone(),
            size: assembled.len() as u64,
            service: upload.meta.service,
            checksum_sha256: Some(format!("{:x}", hasher.finalize())),
            is_uploaded: true,
            created_at: Utc::now(),
        };

        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file_id.to_string(), file.clone());

        Ok(file)
    }

    async fn abort_upload(&self, file_id: &str) -> Result<(), StorageApiError> {
        let staging_dir = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(file_id).map(|u| u.staging_dir)
        };
        if let Some(dir) = staging_dir {
            if dir.exists() {
                tokio::fs::remove_dir_all(&dir).await?;
            }
        }
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<FileObject, StorageApiError> {
        self.completed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(file_id)
            .cloned()
            .ok_or_else(|| StorageApiError::NotFound(file_id.to_string()))
    }
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
