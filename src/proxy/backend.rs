//! Backend server management
//!
//! Backends are grouped into pools, one per function name plus a default
//! pool. The route table picks the pool for a connection from the name its
//! first request carried, and the pool picks a backend round-robin.

use crate::config::{BackendConfig, Config};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive connect failures before a backend is taken out of rotation.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Represents the current state of a backend server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Backend is healthy and accepting connections
    Up,
    /// Backend is down or unreachable
    Down,
}

/// Represents a backend server with its metadata
#[derive(Debug, Clone)]
pub struct Backend {
    /// Backend URL (e.g., "tcp://127.0.0.1:9000")
    pub url: String,

    /// Optional backend name for logging
    pub name: Option<String>,

    /// Current state of the backend
    pub state: BackendState,

    /// Number of consecutive failures
    pub consecutive_failures: u32,
}

impl Backend {
    /// Create a new backend from configuration
    pub fn new(config: BackendConfig) -> Self {
        Self {
            url: config.url,
            name: config.name,
            state: BackendState::Up,
            consecutive_failures: 0,
        }
    }

    /// Get a display name for the backend (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    /// The `host:port` to dial, taken from the backend URL.
    ///
    /// A URL without an explicit port gets 443 for `https` and 80 otherwise.
    pub fn address(&self) -> Result<String> {
        let url = url::Url::parse(&self.url).context("Invalid backend URL")?;
        let host = url.host_str().context("Backend URL missing host")?;
        let port = url.port().unwrap_or(match url.scheme() {
            "https" => 443,
            _ => 80,
        });
        Ok(format!("{}:{}", host, port))
    }

    /// Mark backend as failed
    pub fn mark_failed(&mut self) {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            self.state = BackendState::Down;
            tracing::warn!(
                backend = self.display_name(),
                failures = self.consecutive_failures,
                "Backend marked as down"
            );
        }
    }

    /// Mark backend as successful
    pub fn mark_success(&mut self) {
        self.consecutive_failures = 0;

        if self.state == BackendState::Down {
            self.state = BackendState::Up;
            tracing::info!(backend = self.display_name(), "Backend recovered");
        }
    }

    /// Check if backend is available for connections
    pub fn is_available(&self) -> bool {
        self.state == BackendState::Up
    }
}

/// Pool of backend servers
#[derive(Debug, Clone)]
pub struct BackendPool {
    backends: Arc<RwLock<Vec<Backend>>>,
    next: Arc<RwLock<usize>>,
}

impl BackendPool {
    /// Create a new backend pool from configuration
    pub fn new(configs: Vec<BackendConfig>) -> Self {
        let backends = configs.into_iter().map(Backend::new).collect();

        Self {
            backends: Arc::new(RwLock::new(backends)),
            next: Arc::new(RwLock::new(0)),
        }
    }

    /// Select the next available backend using round-robin
    ///
    /// Returns None if no backends are available
    pub async fn select_backend(&self) -> Option<Backend> {
        let backends = self.backends.read().await;
        let mut next = self.next.write().await;

        let len = backends.len();
        for offset in 0..len {
            let index = (*next + offset) % len;
            if backends[index].is_available() {
                *next = (index + 1) % len;
                return Some(backends[index].clone());
            }
        }

        None
    }

    /// Mark a backend as failed
    pub async fn mark_backend_failed(&self, backend_url: &str) {
        let mut backends = self.backends.write().await;

        if let Some(backend) = backends.iter_mut().find(|b| b.url == backend_url) {
            backend.mark_failed();
        }
    }

    /// Mark a backend as successful
    pub async fn mark_backend_success(&self, backend_url: &str) {
        let mut backends = self.backends.write().await;

        if let Some(backend) = backends.iter_mut().find(|b| b.url == backend_url) {
            backend.mark_success();
        }
    }

    /// Get all backends (for monitoring/debugging)
    pub async fn get_backends(&self) -> Vec<Backend> {
        self.backends.read().await.clone()
    }

    /// Get count of available backends
    pub async fn available_count(&self) -> usize {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| b.is_available())
            .count()
    }
}

/// Maps function names to the pools that serve them.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, BackendPool>,
    default: Option<BackendPool>,
}

impl RouteTable {
    pub fn new(
        routes: HashMap<String, Vec<BackendConfig>>,
        default_backends: Vec<BackendConfig>,
    ) -> Self {
        let routes = routes
            .into_iter()
            .map(|(function, backends)| (function, BackendPool::new(backends)))
            .collect();
        let default = (!default_backends.is_empty()).then(|| BackendPool::new(default_backends));

        Self { routes, default }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.routes.clone(), cfg.default_backends.clone())
    }

    /// The pool for `function`, falling back to the default pool when the
    /// name is missing or unknown.
    pub fn pool_for(&self, function: Option<&str>) -> Option<&BackendPool> {
        function
            .and_then(|name| self.routes.get(name))
            .or(self.default.as_ref())
    }
}
