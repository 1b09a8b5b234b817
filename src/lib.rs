//! upload-coordinator - Client-side coordination of file uploads behind a form
//!
//! This crate drives one form's file uploads end to end:
//! - An ordered task registry with per-file status, progress, and cancellation
//! - A transfer driver speaking the register -> stream parts -> confirm protocol
//! - Swappable storage backends (local filesystem, platform HTTP API)
//! - A form binding that commits settled file ids into a bound field and keeps
//!   an archived-file flag map beside it

pub mod config;
pub mod form;
pub mod model;
pub mod registry;
pub mod storage_api;
pub mod transfer;

use std::sync::Arc;

use config::Config;
use model::{FileSpec, TaskKey};
use registry::UploadRegistry;
use storage_api::StorageApi;
use transfer::{FileSource, TransferContext};

/// One form's upload session: the registry plus everything transfers need.
pub struct Uploader {
    pub config: Config,
    pub registry: UploadRegistry,
    storage: Arc<dyn StorageApi>,
}

impl Uploader {
    pub fn new(config: Config, storage: Arc<dyn StorageApi>) -> Self {
        Self {
            config,
            registry: UploadRegistry::new(),
            storage,
        }
    }

    /// Edit mode: start from files that already exist on the server.
    pub fn with_initial(config: Config, storage: Arc<dyn StorageApi>, initial: &[model::FileObject]) -> Self {
        Self {
            config,
            registry: UploadRegistry::with_initial(initial),
            storage,
        }
    }

    pub fn transfer_context(&self) -> TransferContext {
        TransferContext::from_config(&self.config, Arc::clone(&self.storage))
    }

    /// Register one file and start its transfer on the runtime. The returned
    /// key identifies the task in the registry; the spawned transfer settles
    /// it as uploaded or failed.
    pub fn enqueue(&self, spec: FileSpec, source: FileSource) -> (TaskKey, tokio::task::JoinHandle<()>) {
        let keys = self.registry.add_files(std::slice::from_ref(&spec));
        let key = keys[0];
        let registry = self.registry.clone();
        let ctx = self.transfer_context();
        let handle = tokio::spawn(async move {
            transfer::run_transfer(&registry, key, source, &ctx).await;
        });
        (key, handle)
    }
}
