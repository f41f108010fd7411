//! Application state

use std::sync::Arc;

use luckychat_billing::{BillingService, PackageCatalog, StripeConfig};
use sqlx::PgPool;

use crate::{
    chat::{ChatService, LlmProvider, OpenAiProvider},
    config::Config,
    dealers::{DealerStore, PgDealerStore},
    storage::{BlobStore, GcsBlobStore, ServiceAccountKey, StorageResult, UploadService},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub billing: BillingService,
    pub chat: Arc<ChatService>,
    pub uploads: Arc<UploadService>,
    pub dealers: Arc<dyn DealerStore>,
}

impl AppState {
    /// Build every service once, in dependency order
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let catalog = PackageCatalog::standard()?
            .with_price_overrides(config.price_overrides.iter().cloned())?;
        tracing::info!(
            packages = catalog.len(),
            overrides = config.price_overrides.len(),
            "Package catalog loaded"
        );

        let stripe_config =
            StripeConfig::new(&config.stripe_secret_key, &config.stripe_webhook_secret)
                .with_timeout(config.vendor_timeout);
        if stripe_config.is_placeholder() {
            tracing::warn!("Stripe is using a placeholder key, checkout calls will fail");
        }
        let dealers: Arc<dyn DealerStore> = Arc::new(PgDealerStore::new(pool.clone()));
        let billing = BillingService::new(stripe_config, pool, Arc::new(catalog));
        tracing::info!("Stripe billing service initialized");

        let provider: Option<Arc<dyn LlmProvider>> = match &config.openai_api_key {
            Some(key) => {
                let provider = OpenAiProvider::new(
                    key.clone(),
                    &config.openai_api_base,
                    config.openai_model.clone(),
                    config.vendor_timeout,
                )?;
                tracing::info!(model = %config.openai_model, "LLM chat enabled");
                Some(Arc::new(provider))
            }
            None => {
                tracing::warn!("LLM chat not configured (missing OPENAI_API_KEY), using fallback replies");
                None
            }
        };
        let chat = ChatService::new(provider, config.vendor_timeout);

        let store = match load_blob_store(&config) {
            Ok(Some(store)) => {
                tracing::info!(bucket = %config.storage_bucket, "Image storage initialized");
                Some(store)
            }
            Ok(None) => {
                tracing::warn!("Image storage not configured (no service account key), uploads disabled");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize image storage, uploads disabled");
                None
            }
        };
        let uploads = UploadService::new(store, &config.storage_bucket, &config.storage_project_id);

        Ok(Self::from_parts(config, billing, chat, uploads, dealers))
    }

    pub fn from_parts(
        config: Config,
        billing: BillingService,
        chat: ChatService,
        uploads: UploadService,
        dealers: Arc<dyn DealerStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            billing,
            chat: Arc::new(chat),
            uploads: Arc::new(uploads),
            dealers,
        }
    }
}

/// GCS store from an inline key or a key file; `None` when neither is set
fn load_blob_store(config: &Config) -> StorageResult<Option<Arc<dyn BlobStore>>> {
    let key = match (&config.storage_service_account, &config.storage_credentials_path) {
        (Some(json), _) => ServiceAccountKey::from_json(json)?,
        (None, Some(path)) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                crate::storage::StorageError::Credentials(format!(
                    "cannot read {}: {}",
                    path, e
                ))
            })?;
            ServiceAccountKey::from_json(&json)?
        }
        (None, None) => return Ok(None),
    };

    let store = GcsBlobStore::new(&config.storage_bucket, key, config.vendor_timeout)?;
    Ok(Some(Arc::new(store)))
}
