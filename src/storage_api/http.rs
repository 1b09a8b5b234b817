use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{CreateUpload, PartReceipt, PartTarget, StorageApi, StorageApiError, UploadTarget};
use crate::model::FileObject;

/// Platform file API backend.
///
/// Upload registration and confirmation are JSON calls against the API;
/// part bytes go straight to the presigned URLs the registration returns.
pub struct HttpStorage {
    base_url: String,
    access_token: String,
    client: Client,
}

#[derive(Deserialize)]
struct CreateUploadResponse {
    id: String,
    upload: UploadInstructions,
}

#[derive(Deserialize)]
struct UploadInstructions {
    parts: Vec<PartTarget>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    detail: Option<String>,
}

impl HttpStorage {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, StorageApiError> {
        let client = Client::builder()
            .build()
            .map_err(|e| StorageApiError::Backend(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn classify(response: Response) -> StorageApiError {
        let status = response.status();
        let detail = response
            .json::<ErrorDetail>()
            .await
            .ok()
            .and_then(|e| e.detail);
        classify_status(status, detail)
    }
}

/// Classify a non-success status. Client errors carry a policy decision
/// (size, type, quota) and map to `Rejected`; anything else is a backend
/// fault.
fn classify_status(status: StatusCode, detail: Option<String>) -> StorageApiError {
    let detail = detail.unwrap_or_else(|| status.to_string());
    if status == StatusCode::NOT_FOUND {
        StorageApiError::NotFound(detail)
    } else if status.is_client_error() {
        StorageApiError::Rejected { reason: detail }
    } else {
        StorageApiError::Backend(detail)
    }
}

fn transport(e: reqwest::Error) -> StorageApiError {
    StorageApiError::Interrupted(e.to_string())
}

#[async_trait]
impl StorageApi for HttpStorage {
    async fn create_upload(&self, req: &CreateUpload) -> Result<UploadTarget, StorageApiError> {
        let response = self
            .client
            .post(self.url("/v1/files/"))
            .bearer_auth(&self.access_token)
            .json(req)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        let created: CreateUploadResponse = response.json().await.map_err(transport)?;
        Ok(UploadTarget {
            file_id: created.id,
            parts: created.upload.parts,
        })
    }

    async fn upload_part(
        &self,
        file_id: &str,
        part: &PartTarget,
        data: Bytes,
    ) -> Result<PartReceipt, StorageApiError> {
        let url = part.url.as_deref().ok_or_else(|| {
            StorageApiError::Backend(format!(
                "no destination URL for part {} of {file_id}",
                part.number
            ))
        })?;

        let response = self
            .client
            .put(url)
            .body(data)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());

        Ok(PartReceipt {
            number: part.number,
            etag,
            checksum_sha256: None,
        })
    }

    async fn complete_upload(
        &self,
        file_id: &str,
        receipts: Vec<PartReceipt>,
    ) -> Result<FileObject, StorageApiError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/files/{file_id}/uploaded")))
            .bearer_auth(&self.access_token)
            .json(&serde_json::json!({ "parts": receipts }))
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        response.json().await.map_err(transport)
    }

    async fn abort_upload(&self, file_id: &str) -> Result<(), StorageApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/files/{file_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;

        // A vanished upload is already the state we want.
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(Self::classify(response).await);
        }
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<FileObject, StorageApiError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/files/{file_id}")))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }

        response.json().await.map_err(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_rejected() {
        let err = classify_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            Some("File exceeds quota".to_string()),
        );
        match err {
            StorageApiError::Rejected { reason } => assert_eq!(reason, "File exceeds quota"),
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(classify_status(StatusCode::UNPROCESSABLE_ENTITY, None).is_rejection());
    }

    #[test]
    fn test_not_found_is_not_a_rejection() {
        let err = classify_status(StatusCode::NOT_FOUND, None);
        assert!(matches!(err, StorageApiError::NotFound(_)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_server_errors_map_to_backend() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, None);
        assert!(matches!(err, StorageApiError::Backend(_)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_missing_detail_falls_back_to_status_text() {
        match classify_status(StatusCode::FORBIDDEN, None) {
            StorageApiError::Rejected { reason } => assert!(reason.contains("403")),
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
