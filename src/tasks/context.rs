//! Wires one [`Settings`] value into the concrete adapters every task
//! needs (Design Notes: "resolve once at startup into a plain value; do
//! not re-read per worker").

use std::sync::Arc;
use std::time::Duration;

use mockable::{Clock, DefaultClock};
use thiserror::Error;

use crate::config::Settings;
use crate::domain::ports::{GatewayClient, ImagePreprocessor, ModelClient, NotePublisher, Store};
use crate::outbound::gateway::{GatewayHttpConfig, HttpGatewayClient};
use crate::outbound::image::{HttpImagePreprocessor, ImageHttpConfig};
use crate::outbound::model_client::{HttpModelClient, ModelHttpConfig};
use crate::outbound::note_publisher::{HttpNotePublisher, NoopNotePublisher, NoteServiceHttpConfig};
use crate::outbound::persistence::{DbPool, DieselStore, PoolConfig};

/// Errors that can occur while wiring adapters together at startup.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("database pool error: {0}")]
    Pool(#[from] crate::outbound::persistence::PoolError),
    #[error("adapter construction failed: {0}")]
    Adapter(String),
}

/// Every port implementation a task needs, plus the resolved settings.
pub struct Context {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn GatewayClient>,
    pub model_client: Arc<dyn ModelClient>,
    pub image_preprocessor: Arc<dyn ImagePreprocessor>,
    pub note_publisher: Arc<dyn NotePublisher>,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
}

/// Construct every adapter from `settings`.
///
/// # Errors
/// Returns [`ContextError`] when the database URL is incomplete, the pool
/// cannot be built, or an HTTP client fails to construct.
pub async fn build_context(settings: Settings) -> Result<Context, ContextError> {
    let database_url = settings.db.connection_url()?;
    let pool = DbPool::new(PoolConfig::new(database_url.clone())).await?;
    let store: Arc<dyn Store> = Arc::new(DieselStore::new(pool, database_url));

    let gateway: Arc<dyn GatewayClient> = Arc::new(
        HttpGatewayClient::new(GatewayHttpConfig {
            base_url: settings.gateway.base_url.clone(),
            bearer_token: settings.gateway.bearer_token.clone(),
            request_timeout: Duration::from_secs(settings.gateway.request_timeout_secs),
        })
        .map_err(|error| ContextError::Adapter(error.to_string()))?,
    );

    let model_client: Arc<dyn ModelClient> = Arc::new(
        HttpModelClient::new(ModelHttpConfig {
            base_url: settings.model.base_url.clone(),
            api_key: settings.model.api_key.clone(),
            request_timeout: Duration::from_secs(120),
        })
        .map_err(|error| ContextError::Adapter(error.to_string()))?,
    );

    let image_preprocessor: Arc<dyn ImagePreprocessor> = Arc::new(
        HttpImagePreprocessor::new(ImageHttpConfig {
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
        })
        .map_err(|error| ContextError::Adapter(error.to_string()))?,
    );

    let note_publisher: Arc<dyn NotePublisher> = if settings.note_service.enabled {
        Arc::new(
            HttpNotePublisher::new(NoteServiceHttpConfig {
                base_url: settings.note_service.base_url.clone(),
                api_key: settings.note_service.api_key.clone(),
                request_timeout: Duration::from_secs(15),
            })
            .map_err(|error| ContextError::Adapter(error.to_string()))?,
        )
    } else {
        Arc::new(NoopNotePublisher)
    };

    Ok(Context {
        store,
        gateway,
        model_client,
        image_preprocessor,
        note_publisher,
        clock: Arc::new(DefaultClock),
        settings,
    })
}
