use thiserror::Error;

use crate::model::ServiceCategory;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

const MIN_PART_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    /// Owning resource the uploads attach to.
    pub organization_id: String,
    /// Upload purpose category sent with every registration.
    pub service: ServiceCategory,
    /// Maximum upload size in bytes; oversize files are refused locally.
    pub max_upload_size: u64,
    /// Bytes per transfer part.
    pub part_size: u64,
    /// Minimum milliseconds between progress updates per task.
    pub progress_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Http,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the local storage backend
    pub local_storage_path: String,
    /// Platform API base URL (required when backend is http)
    pub api_base_url: Option<String>,
    /// Bearer token for the platform API (required when backend is http)
    pub api_token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            api_base_url: None,
            api_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "http" => StorageBackend::Http,
            _ => StorageBackend::Local,
        };

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());
        let api_base_url = std::env::var("API_BASE_URL").ok();
        let api_token = std::env::var("API_TOKEN").ok();

        let organization_id = std::env::var("ORGANIZATION_ID").unwrap_or_default();

        let service = match std::env::var("UPLOAD_SERVICE") {
            Ok(raw) => ServiceCategory::parse(&raw).ok_or_else(|| {
                ConfigError::ValidationError(format!("Unknown UPLOAD_SERVICE: {raw}"))
            })?,
            Err(_) => ServiceCategory::Downloadable,
        };

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let part_size = std::env::var("PART_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8 * 1024 * 1024); // 8MB

        let progress_interval_ms = std::env::var("PROGRESS_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(150);

        let config = Config {
            storage: StorageConfig {
                backend,
                local_storage_path,
                api_base_url,
                api_token,
            },
            organization_id,
            service,
            max_upload_size,
            part_size,
            progress_interval_ms,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.storage.backend, StorageBackend::Http) {
            if self.storage.api_base_url.is_none() {
                return Err(ConfigError::ValidationError(
                    "API_BASE_URL is required when STORAGE_BACKEND=http".to_string(),
                ));
            }
            if self.storage.api_token.is_none() {
                return Err(ConfigError::ValidationError(
                    "API_TOKEN is required when STORAGE_BACKEND=http".to_string(),
                ));
            }
            if self.organization_id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "ORGANIZATION_ID is required when STORAGE_BACKEND=http".to_string(),
                ));
            }
        }

        if self.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "PART_SIZE must be at least {MIN_PART_SIZE} bytes"
            )));
        }

        if self.max_upload_size < self.part_size {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must not be smaller than PART_SIZE".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            organization_id: String::new(),
            service: ServiceCategory::Downloadable,
            max_upload_size: 50 * 1024 * 1024,
            part_size: 8 * 1024 * 1024,
            progress_interval_ms: 150,
        }
    }
}
