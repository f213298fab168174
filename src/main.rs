use opizontas_registry::config::Config;
use opizontas_registry::{init_tracing, server};

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting registry server...");
    let config = Config::load()?;
    server::start(config).await?;
    Ok(())
}
