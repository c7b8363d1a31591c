use rustyproxy::ProxyContext;
use rustyproxy::config::ProxyConfig;
use rustyproxy::net::server::Server;
use tracing_subscriber::EnvFilter;

#[async_std::main]
async fn main() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rustyproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => ProxyConfig::from_file(path),
        None => ProxyConfig::default(),
    };

    let ctx = ProxyContext::new(config)?;
    let server = Server::bind(ctx).await?;
    server.run().await
}
