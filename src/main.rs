use std::sync::Arc;

use thiserror::Error;

use eduhub_points::api::middleware::cors;
use eduhub_points::api::server::{AppState, start_server};
use eduhub_points::db::StorageError;
use eduhub_points::util::env::{self, EnvErr};
use eduhub_points::util::telemetry;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Telemetry(#[from] Box<dyn std::error::Error + Send + Sync>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = env::env().await?;
    let telemetry_registry = telemetry::Telemetry::new(settings)?.register()?;

    tracing::info!(backend = ?settings.storage_backend, "starting points service");

    let state = Arc::new(AppState::from_env(settings).await?);
    let served = start_server(
        state,
        cors(&settings.cors_allow_origins),
        settings.server_api_port,
    )
    .await;

    telemetry_registry.shutdown();
    Ok(served?)
}
