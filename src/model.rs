use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Locally generated handle for an upload task.
///
/// Assigned when the file enters the registry, before the server has issued
/// a durable file id. All registry lookups go through the key; the server id
/// only identifies the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey(Uuid);

impl TaskKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Upload purpose category, chosen by the owning form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Downloadable,
    ProductMedia,
    OrganizationAvatar,
}

impl ServiceCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "downloadable" => Some(Self::Downloadable),
            "product_media" => Some(Self::ProductMedia),
            "organization_avatar" => Some(Self::OrganizationAvatar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// Classification of a file derived from its MIME type, for display grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Audio,
    Binary,
    Document,
    Image,
    Video,
}

impl FileType {
    pub fn from_mime(mime_type: &str) -> Self {
        let mut parts = mime_type.split('/');
        let primary = parts.next().unwrap_or("");
        let sub = parts.next().unwrap_or("");
        match primary {
            "audio" => FileType::Audio,
            "image" => FileType::Image,
            "video" => FileType::Video,
            "text" => FileType::Document,
            "application" => match sub {
                "pdf" | "msword" | "rtf" | "zip" => FileType::Document,
                _ if sub.starts_with("vnd.openxmlformats-officedocument")
                    || sub.starts_with("vnd.ms-") =>
                {
                    FileType::Document
                }
                _ => FileType::Binary,
            },
            _ => FileType::Binary,
        }
    }
}

/// Description of a file the caller wants uploaded: the input to
/// `UploadRegistry::add_files`.
#[derive(Debug, Clone)]
pub struct FileSpec {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileSpec {
    /// Build a spec for a file on disk, guessing the MIME type from the name.
    pub fn for_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            name,
            size: meta.len(),
            mime_type,
        })
    }
}

/// One file's upload lifecycle record.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub key: TaskKey,
    /// Server-assigned file id; `None` until the upload registers.
    /// Stable once set.
    pub id: Option<String>,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub status: TaskStatus,
    pub progress_bytes: u64,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn pending(spec: &FileSpec) -> Self {
        Self {
            key: TaskKey::new(),
            id: None,
            name: spec.name.clone(),
            size: spec.size,
            mime_type: spec.mime_type.clone(),
            status: TaskStatus::Pending,
            progress_bytes: 0,
            error: None,
        }
    }

    /// A task for a file that already lives on the server (edit mode).
    pub fn settled(file: &FileObject) -> Self {
        Self {
            key: TaskKey::new(),
            id: Some(file.id.clone()),
            name: file.name.clone(),
            size: file.size,
            mime_type: file.mime_type.clone(),
            status: TaskStatus::Uploaded,
            progress_bytes: file.size,
            error: None,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == TaskStatus::Uploaded
    }

    pub fn file_type(&self) -> FileType {
        FileType::from_mime(&self.mime_type)
    }

    /// Merge a partial update into this task.
    ///
    /// Progress never moves backwards: a patch carrying fewer bytes than
    /// already reported is clamped to the current value. The server id is
    /// set once and further id patches are ignored.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(progress) = patch.progress_bytes {
            let capped = progress.min(self.size);
            if capped > self.progress_bytes {
                self.progress_bytes = capped;
            }
        }
        if let Some(id) = patch.id {
            if self.id.is_none() {
                self.id = Some(id);
            }
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
    }
}

/// Partial update merged into a task: the registry's unit of mutation.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub id: Option<String>,
    pub progress_bytes: Option<u64>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(bytes: u64) -> Self {
        Self {
            progress_bytes: Some(bytes),
            ..Default::default()
        }
    }

    pub fn uploaded(file: &FileObject) -> Self {
        Self {
            status: Some(TaskStatus::Uploaded),
            id: Some(file.id.clone()),
            progress_bytes: Some(file.size),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A confirmed server-side file record, as returned by the storage API on
/// completion and as supplied when seeding a registry in edit mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub service: ServiceCategory,
    #[serde(default)]
    pub checksum_sha256: Option<String>,
    pub is_uploaded: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> UploadTask {
        UploadTask::pending(&FileSpec {
            name: "track.flac".to_string(),
            size: 100,
            mime_type: "audio/flac".to_string(),
        })
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut t = task();
        t.apply(TaskPatch::status(TaskStatus::Uploading));
        t.apply(TaskPatch::progress(40));
        t.apply(TaskPatch::progress(25));
        assert_eq!(t.progress_bytes, 40);
        t.apply(TaskPatch::progress(90));
        assert_eq!(t.progress_bytes, 90);
    }

    #[test]
    fn test_progress_capped_at_size() {
        let mut t = task();
        t.apply(TaskPatch::progress(500));
        assert_eq!(t.progress_bytes, 100);
    }

    #[test]
    fn test_id_set_once() {
        let mut t = task();
        t.apply(TaskPatch {
            id: Some("file-1".to_string()),
            ..Default::default()
        });
        t.apply(TaskPatch {
            id: Some("file-2".to_string()),
            ..Default::default()
        });
        assert_eq!(t.id.as_deref(), Some("file-1"));
    }

    #[test]
    fn test_file_type_from_mime() {
        assert_eq!(FileType::from_mime("image/png"), FileType::Image);
        assert_eq!(FileType::from_mime("application/pdf"), FileType::Document);
        assert_eq!(
            FileType::from_mime(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            FileType::Document
        );
        assert_eq!(FileType::from_mime("application/wasm"), FileType::Binary);
        assert_eq!(FileType::from_mime("garbage"), FileType::Binary);
    }
}
