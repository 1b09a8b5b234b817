use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{FileObject, ServiceCategory, TaskKey, TaskPatch, TaskStatus, UploadTask};
use crate::registry::UploadRegistry;
use crate::storage_api::{plan_parts, CreateUpload, StorageApi, StorageApiError};

/// Everything a transfer needs besides the file itself.
#[derive(Clone)]
pub struct TransferContext {
    pub storage: Arc<dyn StorageApi>,
    pub organization_id: String,
    pub service: ServiceCategory,
    pub part_size: u64,
    pub max_upload_size: u64,
    pub progress_interval: Duration,
}

impl TransferContext {
    pub fn from_config(config: &Config, storage: Arc<dyn StorageApi>) -> Self {
        Self {
            storage,
            organization_id: config.organization_id.clone(),
            service: config.service,
            part_size: config.part_size,
            max_upload_size: config.max_upload_size,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
        }
    }
}

/// Bytes for one transfer, either in memory (drag-and-drop payload) or read
/// from disk at transfer time.
#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(Bytes),
    Path(PathBuf),
}

impl FileSource {
    async fn load(self) -> Result<Bytes, std::io::Error> {
        match self {
            FileSource::Bytes(data) => Ok(data),
            FileSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

/// Coalesces progress patches so a fast transfer does not flood the
/// registry. The final byte count is always reported by the caller,
/// regardless of throttling.
pub struct ProgressThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn ready(&mut self) -> bool {
        match self.last {
            Some(at) if at.elapsed() < self.min_interval => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}

/// Drive one file's transfer to completion.
///
/// Errors are terminal for the task, never for the caller: any storage
/// failure lands in the task record as `Failed` with a display message.
/// Cancellation (the task was removed from the registry) stops the transfer
/// at the next await point and cleans up any partially registered upload.
pub async fn run_transfer(
    registry: &UploadRegistry,
    key: TaskKey,
    source: FileSource,
    ctx: &TransferContext,
) {
    let Some(token) = registry.cancellation(key) else {
        debug!(%key, "transfer not started; task already removed");
        return;
    };

    let data = match source.load().await {
        Ok(data) => data,
        Err(e) => {
            registry.apply(key, TaskPatch::failed(format!("could not read file: {e}")));
            return;
        }
    };

    let Some(task) = registry.get(key) else {
        return;
    };

    if data.len() as u64 > ctx.max_upload_size {
        registry.apply(
            key,
            TaskPatch::failed(format!(
                "file exceeds maximum upload size of {} bytes",
                ctx.max_upload_size
            )),
        );
        return;
    }

    registry.apply(key, TaskPatch::status(TaskStatus::Uploading));

    let mut created: Option<String> = None;
    match drive(registry, key, &task, data, ctx, &token, &mut created).await {
        Ok(Some(file)) => {
            info!(%key, file_id = %file.id, size = file.size, "upload complete");
            registry.apply(key, TaskPatch::uploaded(&file));
        }
        Ok(None) => {
            debug!(%key, "transfer cancelled");
            if let Some(file_id) = created {
                if let Err(e) = ctx.storage.abort_upload(&file_id).await {
                    debug!(%file_id, error = %e, "abort after cancel failed");
                }
            }
        }
        Err(err) => {
            warn!(%key, name = %task.name, error = %err, "upload failed");
            if let Some(file_id) = &created {
                if let Err(e) = ctx.storage.abort_upload(file_id).await {
                    debug!(%file_id, error = %e, "abort after failure failed");
                }
            }
            registry.apply(key, TaskPatch::failed(err.to_string()));
        }
    }
}

/// Ok(None) means the transfer was cancelled before finishing.
async fn drive(
    registry: &UploadRegistry,
    key: TaskKey,
    task: &UploadTask,
    data: Bytes,
    ctx: &TransferContext,
    token: &CancellationToken,
    created: &mut Option<String>,
) -> Result<Option<FileObject>, StorageApiError> {
    let size = data.len() as u64;
    let req = CreateUpload {
        organization_id: ctx.organization_id.clone(),
        service: ctx.service,
        name: task.name.clone(),
        mime_type: task.mime_type.clone(),
        size,
        parts: plan_parts(size, ctx.part_size),
    };

    let target = tokio::select! {
        _ = token.cancelled() => return Ok(None),
        res = ctx.storage.create_upload(&req) => res?,
    };
    *created = Some(target.file_id.clone());

    let mut throttle = ProgressThrottle::new(ctx.progress_interval);
    let mut receipts = Vec::with_capacity(target.parts.len());
    let mut sent: u64 = 0;

    for part in &target.parts {
        // The backend echoes the planned layout; never trust it blindly. A
        // range past the end of the buffer settles the task as failed
        // instead of panicking the transfer.
        let end = part
            .offset
            .checked_add(part.len)
            .filter(|&end| end <= size)
            .ok_or_else(|| {
                StorageApiError::Backend(format!(
                    "part {} range {}+{} exceeds file size {}",
                    part.number, part.offset, part.len, size
                ))
            })?;
        let chunk = data.slice(part.offset as usize..end as usize);

        let receipt = tokio::select! {
            _ = token.cancelled() => return Ok(None),
            res = ctx.storage.upload_part(&target.file_id, part, chunk) => res?,
        };
        receipts.push(receipt);
        sent += part.len;

        if throttle.ready() {
            registry.apply(key, TaskPatch::progress(sent));
        }
    }
    registry.apply(key, TaskPatch::progress(sent));

    let file = tokio::select! {
        _ = token.cancelled() => return Ok(None),
        res = ctx.storage.complete_upload(&target.file_id, receipts) => res?,
    };

    Ok(Some(file))
}
