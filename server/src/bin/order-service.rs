//! Order service: order API, store and event publisher.

use courier_server::config::ORDER_SERVICE_PORT;
use courier_server::{Application, Config, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env(ORDER_SERVICE_PORT)?;
    init_tracing(&config.server.log_level, config.server.log_format);

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        "Starting order service"
    );

    Application::order_service(&config).await?.run().await
}
