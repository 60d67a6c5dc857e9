use gust_push_server::config::PushServerConfig;
use gust_push_server::server::PushServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PushServerConfig::from_env();
    let server = PushServer::new(config);

    info!("Starting Push Server");

    server.run().await?;
    Ok(())
}
