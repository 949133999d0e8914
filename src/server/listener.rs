use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::proxy::ProxyHandler;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let handler = Arc::new(ProxyHandler::from_config(cfg)?);
    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    info!("Listening on {}", cfg.listen_addr);

    serve(listener, handler).await
}

/// Accept loop. Every connection gets its own task and its own shims.
pub async fn serve(listener: TcpListener, handler: Arc<ProxyHandler>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(socket).await {
                tracing::error!("Connection error from {}: {:#}", peer, e);
            }
        });
    }
}
