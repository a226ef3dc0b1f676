use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use assistant_module::service::{run_server, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;
    let result = run_server(config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    })
    .await;
    if let Err(err) = &result {
        error!("calendar gateway stopped with error: {}", err);
    }
    result
}
