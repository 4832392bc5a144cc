use anyhow::{Context, Result};
use forgeryd::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forgeryd starting");

    let config = Config::from_env()?;
    let bind = config.bind.clone();
    tracing::info!(
        bind = %bind,
        storage_dir = %config.storage_dir.display(),
        db_path = %config.db_path.display(),
        model_dir = %config.model_dir.display(),
        inference = %config.inference,
        "configuration loaded"
    );

    let state = forgeryd::build_state(config).await?;
    let app = forgeryd::http::build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %listener.local_addr()?, "forgeryd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("forgeryd shutting down");
    Ok(())
}
