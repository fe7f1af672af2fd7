use pipeline::config::Config;
use pipeline::proxy::{ProxyHandler, UpstreamPool};
use pipeline::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let pool = UpstreamPool::from_addresses(cfg.backends.iter().cloned())?;
    let handler = ProxyHandler::new(pool);
    let listen_addr = cfg.listen_addr();

    tokio::select! {
        res = server::listener::run(&listen_addr, handler) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
