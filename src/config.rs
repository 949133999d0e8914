//! Proxy configuration.
//!
//! Loaded from the YAML file named by `MFPROXY_CONFIG` when set; every field
//! has a default, so an empty document is a valid configuration. The
//! `LISTEN` environment variable overrides `listen_addr`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::http::request::MethodSet;
use crate::sniff::SniffSettings;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub connect_timeout_ms: u64,
    /// How long to wait for the client's first line before routing anyway.
    pub sniff_timeout_ms: u64,
    pub sniff: SniffConfig,
    /// Backends for connections that carry no function name, or an unknown one.
    pub default_backends: Vec<BackendConfig>,
    /// Function name -> backends serving it.
    pub routes: HashMap<String, Vec<BackendConfig>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Backend address as a URL (e.g. "tcp://127.0.0.1:9000")
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SniffConfig {
    pub query_key: String,
    pub max_lookahead: usize,
    pub read_chunk: usize,
    pub methods: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            connect_timeout_ms: 5000,
            sniff_timeout_ms: 3000,
            sniff: SniffConfig::default(),
            default_backends: Vec::new(),
            routes: HashMap::new(),
        }
    }
}

impl Default for SniffConfig {
    fn default() -> Self {
        let defaults = SniffSettings::default();
        Self {
            query_key: defaults.query_key,
            max_lookahead: defaults.max_lookahead,
            read_chunk: defaults.read_chunk,
            methods: defaults.methods.iter().map(|m| m.as_str().to_string()).collect(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("MFPROXY_CONFIG") {
            Ok(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config file {}", path))?;
                Self::from_yaml(&text).with_context(|| format!("invalid config file {}", path))?
            }
            Err(_) => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // serde_yaml rejects an empty document, but "no settings" is valid here.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(text).context("failed to parse YAML")?;
        cfg.sniff.settings()?;
        Ok(cfg)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }
}

impl SniffConfig {
    /// Validates the section and turns it into the settings the shims run with.
    pub fn settings(&self) -> Result<SniffSettings> {
        if self.query_key.is_empty() {
            anyhow::bail!("sniff.query_key must not be empty");
        }
        if self.max_lookahead == 0 {
            anyhow::bail!("sniff.max_lookahead must be greater than zero");
        }
        if self.read_chunk == 0 {
            anyhow::bail!("sniff.read_chunk must be greater than zero");
        }

        let methods = MethodSet::from_names(&self.methods)
            .map_err(|name| anyhow::anyhow!("unknown HTTP method in sniff.methods: {}", name))?;
        if methods.is_empty() {
            anyhow::bail!("sniff.methods must list at least one method");
        }

        Ok(SniffSettings {
            methods,
            query_key: self.query_key.clone(),
            max_lookahead: self.max_lookahead,
            read_chunk: self.read_chunk,
        })
    }
}
