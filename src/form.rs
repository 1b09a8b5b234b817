use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::model::{TaskStatus, UploadTask};
use crate::registry::RegistrySnapshot;

/// The external form-state collaborator: a keyed value store with
/// field-level errors, in the shape generic form containers expose.
pub trait FormContext {
    fn set_value(&mut self, path: &str, value: serde_json::Value);
    fn get_value(&self, path: &str) -> Option<serde_json::Value>;
    fn set_error(&mut self, path: &str, message: &str);
    fn clear_errors(&mut self, path: &str);
}

/// In-memory form backing for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryForm {
    values: BTreeMap<String, serde_json::Value>,
    errors: BTreeMap<String, String>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self, path: &str) -> Option<&str> {
        self.errors.get(path).map(|s| s.as_str())
    }
}

impl FormContext for MemoryForm {
    fn set_value(&mut self, path: &str, value: serde_json::Value) {
        self.values.insert(path.to_string(), value);
    }

    fn get_value(&self, path: &str) -> Option<serde_json::Value> {
        self.values.get(path).cloned()
    }

    fn set_error(&mut self, path: &str, message: &str) {
        self.errors.insert(path.to_string(), message.to_string());
    }

    fn clear_errors(&mut self, path: &str) {
        self.errors.remove(path);
    }
}

/// Field-level validation outcome for the bound files field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMessage {
    AtLeastOneFile,
    WaitForUploads,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMessage::AtLeastOneFile => write!(f, "Please upload at least one file"),
            ValidationMessage::WaitForUploads => {
                write!(f, "Please wait for all files to finish uploading")
            }
        }
    }
}

/// Conceptual state of the bound field, re-derived on every registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// No uploaded files yet.
    Incomplete,
    /// At least one task still in flight.
    Uploading,
    /// Every task settled as uploaded.
    Ready,
}

/// Validation capability registered once against a form field and re-invoked
/// by the container on every relevant change.
#[derive(Debug, Clone)]
pub struct FieldValidator {
    pub path: String,
}

impl FieldValidator {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Invalid when nothing has been committed, or when any task has not
    /// yet settled as uploaded.
    pub fn validate(&self, tasks: &[UploadTask]) -> Result<(), ValidationMessage> {
        if tasks.iter().any(|t| !t.is_uploaded()) {
            return Err(ValidationMessage::WaitForUploads);
        }
        if tasks.is_empty() {
            return Err(ValidationMessage::AtLeastOneFile);
        }
        Ok(())
    }
}

pub fn field_state(tasks: &[UploadTask]) -> FieldState {
    let in_flight = tasks
        .iter()
        .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Uploading));
    if in_flight {
        FieldState::Uploading
    } else if tasks.iter().any(|t| t.is_uploaded()) {
        FieldState::Ready
    } else {
        FieldState::Incomplete
    }
}

/// Pure archive-map transition: insert on true, delete on false. Absence
/// means not archived; the map never holds a false entry.
pub fn apply_archive(
    map: &BTreeMap<String, bool>,
    id: &str,
    archived: bool,
) -> BTreeMap<String, bool> {
    let mut next = map.clone();
    if archived {
        next.insert(id.to_string(), true);
    } else {
        next.remove(id);
    }
    next
}

/// Synchronizes registry state into a parent form: the committed id list
/// into the files field, the archive flags into a sibling field.
#[derive(Debug)]
pub struct FormBinding {
    archived_path: String,
    validator: FieldValidator,
    archived: BTreeMap<String, bool>,
}

impl FormBinding {
    pub fn new(files_path: impl Into<String>, archived_path: impl Into<String>) -> Self {
        Self {
            validator: FieldValidator::new(files_path),
            archived_path: archived_path.into(),
            archived: BTreeMap::new(),
        }
    }

    /// The field path the validator is registered against; all committed-id
    /// writes and error reports target it.
    pub fn files_path(&self) -> &str {
        &self.validator.path
    }

    /// Carry over a pre-existing archive map (edit mode).
    pub fn with_archived(mut self, initial: BTreeMap<String, bool>) -> Self {
        self.archived = initial;
        self
    }

    pub fn archived(&self) -> &BTreeMap<String, bool> {
        &self.archived
    }

    /// Write the committed id list into the form. A non-empty list clears
    /// the "at least one file" error before the value lands.
    pub fn sync<F: FormContext>(&self, form: &mut F, snapshot: &RegistrySnapshot) -> FieldState {
        if !snapshot.committed_ids.is_empty() {
            form.clear_errors(&self.validator.path);
        }
        form.set_value(&self.validator.path, to_value(&snapshot.committed_ids));
        debug!(
            path = %self.validator.path,
            committed = snapshot.committed_ids.len(),
            "form field synced"
        );
        field_state(&snapshot.tasks)
    }

    /// Run the registered validator and surface the outcome as a field
    /// error (or clear it).
    pub fn validate<F: FormContext>(
        &self,
        form: &mut F,
        snapshot: &RegistrySnapshot,
    ) -> Result<(), ValidationMessage> {
        match self.validator.validate(&snapshot.tasks) {
            Ok(()) => {
                form.clear_errors(&self.validator.path);
                Ok(())
            }
            Err(message) => {
                form.set_error(&self.validator.path, &message.to_string());
                Err(message)
            }
        }
    }

    /// Flip a file's archived flag and persist the resulting map.
    pub fn set_archived<F: FormContext>(&mut self, form: &mut F, file_id: &str, archived: bool) {
        self.archived = apply_archive(&self.archived, file_id, archived);
        form.set_value(&self.archived_path, to_value(&self.archived));
    }
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    // Vec<String> and BTreeMap<String, bool> serialize infallibly.
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_archive_set_then_unset_leaves_map_clean() {
        let map = BTreeMap::new();
        let set = apply_archive(&map, "file-1", true);
        assert_eq!(set.get("file-1"), Some(&true));

        let unset = apply_archive(&set, "file-1", false);
        assert!(!unset.contains_key("file-1"));
        assert_eq!(unset, map);
    }

    #[test]
    fn test_apply_archive_unset_absent_is_noop() {
        let map = BTreeMap::from([("other".to_string(), true)]);
        let next = apply_archive(&map, "file-1", false);
        assert_eq!(next, map);
    }

    #[test]
    fn test_binding_reports_through_validator_path() {
        let binding = FormBinding::new("fields.uploads", "fields.archived");
        assert_eq!(binding.files_path(), "fields.uploads");

        let mut form = MemoryForm::new();
        let empty = crate::registry::RegistrySnapshot::default();

        assert!(binding.validate(&mut form, &empty).is_err());
        assert_eq!(
            form.error("fields.uploads"),
            Some("Please upload at least one file")
        );

        binding.sync(&mut form, &empty);
        assert_eq!(
            form.get_value("fields.uploads"),
            Some(serde_json::json!([]))
        );
    }
}
