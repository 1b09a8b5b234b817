use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_coordinator::{
    config::{Config, StorageBackend},
    form::{FormBinding, MemoryForm},
    model::FileSpec,
    storage_api as storage,
    transfer::FileSource,
    Uploader,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "upload-coordinator starting"
    );

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: upload-coordinator <file>...");
    }

    // Load configuration
    let config = Config::load()?;

    // Initialize storage backend
    let store: Arc<dyn storage::StorageApi> = match config.storage.backend {
        StorageBackend::Local => {
            let store =
                storage::LocalStorage::new(&config.storage.local_storage_path, config.max_upload_size)?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            Arc::new(store)
        }
        StorageBackend::Http => {
            let base_url = config
                .storage
                .api_base_url
                .as_deref()
                .expect("API_BASE_URL validated in config");
            let token = config
                .storage
                .api_token
                .as_deref()
                .expect("API_TOKEN validated in config");
            let store = storage::HttpStorage::new(base_url, token)?;
            info!("Using HTTP storage backend at: {}", base_url);
            Arc::new(store)
        }
    };

    let uploader = Uploader::new(config, store);
    let mut form = MemoryForm::new();
    let binding = FormBinding::new("properties.files", "properties.archived");

    // Enqueue every file named on the command line; transfers run
    // concurrently on the runtime.
    let mut handles = Vec::new();
    for path in &paths {
        let spec = FileSpec::for_path(path)?;
        info!(name = %spec.name, size = spec.size, mime = %spec.mime_type, "enqueueing");
        let (_key, handle) = uploader.enqueue(spec, FileSource::Path(path.into()));
        handles.push(handle);
    }

    for handle in handles {
        handle.await?;
    }

    let snapshot = uploader.registry.snapshot();
    binding.sync(&mut form, &snapshot);

    for task in &snapshot.tasks {
        match &task.error {
            Some(message) => info!(name = %task.name, %message, "upload failed"),
            None => info!(
                name = %task.name,
                id = task.id.as_deref().unwrap_or("-"),
                "upload settled"
            ),
        }
    }

    if let Err(message) = binding.validate(&mut form, &snapshot) {
        anyhow::bail!("{message}");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot.committed_ids)?
    );
    Ok(())
}
