pub mod coordinator;
pub mod rest;

use crate::config::Config;
use crate::storage::UploadStore;
use std::sync::Arc;

pub use coordinator::TransferCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<TransferCoordinator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(uploads: UploadStore, config: Config) -> Self {
        let coordinator = TransferCoordinator::new(
            Arc::new(uploads),
            config.read_only,
            config.allow_overwrite,
            config.zip_spool_bytes,
        );
        Self {
            coordinator: Arc::new(coordinator),
            config: Arc::new(config),
        }
    }
}
