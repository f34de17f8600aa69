use std::sync::Arc;

use rcproxy::{CacheStore, HttpClient, ProxyConfig, ProxyHandler, Request, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::default();
    let cache = Arc::new(CacheStore::with_shards(config.cache_shards));
    let proxy = Arc::new(ProxyHandler::new(
        config.upstream.clone(),
        HttpClient::new(),
        cache,
    ));

    let server = match Server::bind(&config.listen_addr).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start proxy");
            return Err(e.into());
        }
    };

    info!(
        address = %server.local_addr(),
        upstream = %config.upstream,
        "starting caching proxy"
    );

    server
        .run_until(
            move |req: Request| {
                let proxy = Arc::clone(&proxy);
                async move { proxy.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    Ok(())
}
