//! Notification service: order event consumers and the WebSocket gateway.

use courier_server::config::NOTIFICATION_SERVICE_PORT;
use courier_server::{Application, Config, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env(NOTIFICATION_SERVICE_PORT)?;
    init_tracing(&config.server.log_level, config.server.log_format);

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        auth = %config.auth.url,
        "Starting notification service"
    );

    Application::notification_service(&config).await?.run().await
}
