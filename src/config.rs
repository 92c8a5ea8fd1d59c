use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::overrides::OverrideTable;

/// On-disk configuration (JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Listen host; empty means all interfaces.
    pub bind: String,
    pub port: u16,
    /// Upstream resolver as `host:port`.
    pub dns: String,
    /// Domain name -> address overrides.
    #[serde(default)]
    pub records: HashMap<String, String>,
    /// Upstream round-trip deadline in milliseconds; 0 waits forever.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Concurrent handling units allowed; 0 disables the limit.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
}

/// Compiled, immutable runtime settings shared by the listener and every handler.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub upstream: String,
    pub upstream_timeout: Duration,
    pub max_inflight: usize,
    pub overrides: OverrideTable,
}

impl Settings {
    pub fn from_config(cfg: ProxyConfig) -> Result<Self> {
        let ip: IpAddr = if cfg.bind.trim().is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            cfg.bind
                .trim()
                .parse()
                .with_context(|| format!("parse bind address: {}", cfg.bind))?
        };
        if cfg.dns.trim().is_empty() {
            anyhow::bail!("upstream dns address is empty");
        }
        let overrides = OverrideTable::from_records(cfg.records).context("compile records")?;

        Ok(Self {
            bind_addr: SocketAddr::new(ip, cfg.port),
            upstream: cfg.dns.trim().to_string(),
            upstream_timeout: Duration::from_millis(cfg.upstream_timeout_ms),
            max_inflight: cfg.max_inflight,
            overrides,
        })
    }
}

pub fn load_config(path: &Path) -> Result<ProxyConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    let cfg: ProxyConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parse config file: {}", path.display()))?;

    info!(target = "config", path = %path.display(), records = cfg.records.len(), "config loaded");
    Ok(cfg)
}

fn default_upstream_timeout_ms() -> u64 {
    2000
}

fn default_max_inflight() -> usize {
    1024
}
