use std::sync::Arc;

use send_messages_module::LineClient;
use tokio_util::task::TaskTracker;

use crate::blob_store::BlobStore;
use crate::errors::ErrorNormalizer;
use crate::extraction::{EventExtractor, ExtractorConfig};
use crate::store::{SqliteStore, StoreError};

use super::config::ServiceConfig;

/// Services shared by every request, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub store: Arc<SqliteStore>,
    pub line: Arc<LineClient>,
    pub extractor: Arc<EventExtractor>,
    pub blobs: Arc<BlobStore>,
    pub normalizer: Arc<ErrorNormalizer>,
    /// Webhook dispatch tasks; drained on shutdown.
    pub tracker: TaskTracker,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Result<Self, StoreError> {
        let store = Arc::new(SqliteStore::new(&config.database_path)?);
        let line = Arc::new(LineClient::with_base_urls(
            config.line_channel_access_token.clone().unwrap_or_default(),
            config.line_api_base_url.clone(),
            config.line_data_api_base_url.clone(),
        ));
        let extractor = Arc::new(EventExtractor::new(ExtractorConfig {
            api_key: config.openai_api_key.clone(),
            api_url: config.openai_api_url.clone(),
            model: config.extraction_model.clone(),
        }));
        let blobs = Arc::new(BlobStore::new(config.file_storage_root.clone()));
        Ok(Self {
            config: Arc::new(config),
            store,
            line,
            extractor,
            blobs,
            normalizer: Arc::new(ErrorNormalizer::new()),
            tracker: TaskTracker::new(),
        })
    }
}
