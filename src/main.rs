use webhook_relay::config::Config;
use webhook_relay::server::Server;
use webhook_relay::telemetry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    let server = Server::new(&config).await?;

    // Pick up deliveries left unfinished by a previous run
    server.manager().recover_pending().await?;

    server.run().await
}
