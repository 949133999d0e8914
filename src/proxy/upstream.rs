//! Upstream connection and byte relaying
//!
//! Each accepted connection is wrapped in the sniffing shims, read until
//! the routing parameter is known, then spliced to a backend chosen by
//! that parameter.

use crate::config::Config;
use crate::proxy::backend::{Backend, RouteTable};
use crate::sniff::{HttpClassifier, ParamInterceptor, SniffSettings};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Handles routing client connections to backend servers
pub struct ProxyHandler {
    /// Function name -> backend pools
    routes: RouteTable,

    /// Shared by every connection's shims
    settings: Arc<SniffSettings>,

    /// Connection timeout duration
    connect_timeout: Duration,

    /// How long to wait for the first request line
    sniff_timeout: Duration,
}

impl ProxyHandler {
    /// Create a new proxy handler
    pub fn new(
        routes: RouteTable,
        settings: SniffSettings,
        connect_timeout: Duration,
        sniff_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            settings: Arc::new(settings),
            connect_timeout,
            sniff_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(
            RouteTable::from_config(cfg),
            cfg.sniff.settings()?,
            cfg.connect_timeout(),
            cfg.sniff_timeout(),
        ))
    }

    /// Proxy one client connection until either side closes it
    ///
    /// This function:
    /// 1. Reads client bytes until the routing parameter is resolved
    /// 2. Picks a backend for the extracted function name
    /// 3. Replays the bytes already read to the backend
    /// 4. Relays both directions until one side closes
    pub async fn handle<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let classifier = HttpClassifier::with_settings(stream, self.settings.clone());
        let mut client = ParamInterceptor::with_settings(classifier, self.settings.clone());
        let function = client.handle();

        let mut head = Vec::new();
        let mut buf = vec![0u8; self.settings.read_chunk];
        let sniffed = timeout(self.sniff_timeout, async {
            while !function.current().is_resolved() {
                let n = client.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            Ok::<_, std::io::Error>(())
        })
        .await;

        match sniffed {
            Ok(res) => res.context("Failed to read from client")?,
            Err(_) => tracing::debug!("No request line before sniff timeout"),
        }

        let extraction = function.current();
        let name = extraction.value();
        tracing::debug!(
            function = ?name,
            classification = ?client.get_ref().classification(),
            buffered = head.len(),
            "Connection sniffed"
        );

        let (backend, mut upstream) = self.connect_backend(name).await?;

        upstream
            .write_all(&head)
            .await
            .context("Failed to replay client bytes to backend")?;

        let relayed = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;

        if let Err(e) = client.close().await {
            tracing::trace!(error = %e, "Client already closed");
        }

        let (to_backend, to_client) = relayed.context("Relay failed")?;
        tracing::info!(
            backend = backend.display_name(),
            function = ?name,
            to_backend = to_backend + head.len() as u64,
            to_client,
            "Connection finished"
        );

        Ok(())
    }

    /// Connect to a backend serving `function`
    ///
    /// Tries each available backend of the chosen pool at most once, marking
    /// failures so a dead backend drops out of rotation.
    pub async fn connect_backend(&self, function: Option<&str>) -> Result<(Backend, TcpStream)> {
        let pool = self
            .routes
            .pool_for(function)
            .with_context(|| format!("No route for function {:?}", function))?;

        let max_attempts = pool.available_count().await;
        if max_attempts == 0 {
            anyhow::bail!("No available backends");
        }

        let mut last_error = None;

        for attempt in 0..max_attempts {
            let backend = match pool.select_backend().await {
                Some(b) => b,
                None => break,
            };

            match self.dial(&backend).await {
                Ok(stream) => {
                    pool.mark_backend_success(&backend.url).await;
                    tracing::info!(
                        backend = backend.display_name(),
                        function = ?function,
                        attempt = attempt + 1,
                        "Connected to backend"
                    );
                    return Ok((backend, stream));
                }
                Err(e) => {
                    pool.mark_backend_failed(&backend.url).await;
                    tracing::warn!(
                        backend = backend.display_name(),
                        error = %e,
                        attempt = attempt + 1,
                        "Failed to connect to backend, will retry with another"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No available backends")))
            .context("All available backends failed")
    }

    async fn dial(&self, backend: &Backend) -> Result<TcpStream> {
        let addr = backend.address()?;
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {}", addr))?;
        Ok(stream)
    }
}
