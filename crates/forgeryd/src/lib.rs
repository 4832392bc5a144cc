//! forgeryd: HTTP API for Aadhaar document forgery detection.
//!
//! Wires the store, the inference engine thread, token auth and the
//! retrain runner into one axum application.

pub mod auth;
pub mod config;
pub mod engine;
pub mod http;
pub mod retrain;

use config::Config;
use forgery_store::Store;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to create storage directory {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("store: {0}")]
    Store(#[from] forgery_store::StoreError),
    #[error("engine: {0}")]
    Engine(#[from] engine::EngineError),
}

/// Open the store, load models and assemble the shared application state.
pub async fn build_state(config: Config) -> Result<http::AppState, StartupError> {
    std::fs::create_dir_all(&config.storage_dir).map_err(|source| StartupError::Storage {
        path: config.storage_dir.display().to_string(),
        source,
    })?;

    let store = Store::open(&config.db_path).await?;
    let engine = engine::spawn_engine(&config)?;
    let tokens = Arc::new(auth::TokenIssuer::new(&config.secret_key, config.token_ttl_minutes));
    let retrain = retrain::RetrainRunner::new(
        config.train_command.clone(),
        config.train_data_dir.clone(),
        config.model_dir.clone(),
        store.clone(),
    );

    Ok(http::AppState {
        store,
        engine,
        tokens,
        retrain,
        config: Arc::new(config),
    })
}
