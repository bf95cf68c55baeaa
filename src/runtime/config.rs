use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::state::NeighborConfig;
use crate::protocols::cost::{MetricWeights, NormalizationBounds};

pub const DEFAULT_LISTEN_PORT: u16 = 55_000;
pub const DEFAULT_HELLO_INTERVAL_SECS: f64 = 5.0;
pub const DEFAULT_DEAD_INTERVAL_SECS: f64 = 20.0;
pub const DEFAULT_METRIC_INTERVAL_SECS: f64 = 30.0;
pub const DEFAULT_PING_COUNT: u32 = 10;
pub const DEFAULT_PING_INTERVAL_SECS: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct FibConfig {
    pub enabled: bool,
    pub dry_run: bool,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub router_id: String,
    pub listen_ip: Ipv4Addr,
    pub listen_port: u16,
    pub hello_interval: f64,
    pub dead_interval: f64,
    pub metric_interval: f64,
    pub ping_count: u32,
    pub ping_interval: f64,
    pub weights: MetricWeights,
    pub normalization: NormalizationBounds,
    pub local_prefixes: BTreeSet<String>,
    pub route_mappings: BTreeMap<String, BTreeSet<String>>,
    pub neighbors: Vec<NeighborConfig>,
    pub fib: FibConfig,
}

#[derive(Debug, Deserialize)]
struct RawNeighbor {
    id: String,
    ip: String,
    port: Option<u16>,
    interface: Option<String>,
    bandwidth: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawFib {
    enabled: Option<bool>,
    dry_run: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    router_id: Option<String>,
    listen_ip: Option<String>,
    listen_port: Option<u16>,
    hello_interval: Option<f64>,
    dead_interval: Option<f64>,
    metric_interval: Option<f64>,
    ping_count: Option<u32>,
    ping_interval: Option<f64>,
    weights_percent: Option<MetricWeights>,
    normalization: Option<NormalizationBounds>,
    #[serde(default)]
    local_prefixes: BTreeSet<String>,
    #[serde(default)]
    route_mappings: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    neighbors: Vec<RawNeighbor>,
    fib: Option<RawFib>,
}

pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    let raw_text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw_text)
}

pub fn parse_config(raw_text: &str) -> Result<DaemonConfig> {
    let raw: RawConfig =
        serde_json::from_str(raw_text).context("failed to parse daemon config json")?;

    let router_id = match raw.router_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => bail!("config is missing a router_id"),
    };

    let listen_ip = raw
        .listen_ip
        .as_deref()
        .unwrap_or("0.0.0.0")
        .parse::<Ipv4Addr>()
        .context("invalid listen_ip")?;
    let listen_port = raw.listen_port.unwrap_or(DEFAULT_LISTEN_PORT);

    let weights = raw.weights_percent.unwrap_or_default();
    validate_weights(&weights)?;
    let normalization = raw.normalization.unwrap_or_default();

    for prefix in &raw.local_prefixes {
        validate_prefix(prefix)?;
    }
    for prefixes in raw.route_mappings.values() {
        for prefix in prefixes {
            validate_prefix(prefix)?;
        }
    }

    let mut neighbors = Vec::with_capacity(raw.neighbors.len());
    let mut seen = BTreeSet::new();
    for raw_neighbor in raw.neighbors {
        if raw_neighbor.id == router_id {
            bail!("neighbor id {} collides with router_id", raw_neighbor.id);
        }
        if !seen.insert(raw_neighbor.id.clone()) {
            bail!("duplicate neighbor id {}", raw_neighbor.id);
        }
        let ip = raw_neighbor
            .ip
            .parse::<Ipv4Addr>()
            .with_context(|| format!("invalid ip for neighbor {}", raw_neighbor.id))?;
        neighbors.push(NeighborConfig {
            router_id: raw_neighbor.id,
            ip,
            port: raw_neighbor.port.unwrap_or(listen_port),
            interface: raw_neighbor
                .interface
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            bandwidth_mbps: raw_neighbor.bandwidth,
        });
    }

    let fib_raw = raw.fib.unwrap_or_default();
    let fib = FibConfig {
        enabled: fib_raw.enabled.unwrap_or(true),
        dry_run: fib_raw.dry_run.unwrap_or(false),
    };

    Ok(DaemonConfig {
        router_id,
        listen_ip,
        listen_port,
        hello_interval: positive(raw.hello_interval, DEFAULT_HELLO_INTERVAL_SECS)?,
        dead_interval: positive(raw.dead_interval, DEFAULT_DEAD_INTERVAL_SECS)?,
        metric_interval: positive(raw.metric_interval, DEFAULT_METRIC_INTERVAL_SECS)?,
        ping_count: raw.ping_count.unwrap_or(DEFAULT_PING_COUNT).max(1),
        ping_interval: positive(raw.ping_interval, DEFAULT_PING_INTERVAL_SECS)?,
        weights,
        normalization,
        local_prefixes: raw.local_prefixes,
        route_mappings: raw.route_mappings,
        neighbors,
        fib,
    })
}

fn positive(raw: Option<f64>, default: f64) -> Result<f64> {
    let value = raw.unwrap_or(default);
    if !value.is_finite() || value <= 0.0 {
        bail!("intervals must be positive, got {value}");
    }
    Ok(value)
}

fn validate_weights(weights: &MetricWeights) -> Result<()> {
    let components = [
        ("latency", weights.latency),
        ("jitter", weights.jitter),
        ("loss", weights.loss),
        ("bandwidth", weights.bandwidth),
    ];
    for (name, value) in components {
        if !value.is_finite() || value < 0.0 {
            bail!("weight {name} must be a non-negative number, got {value}");
        }
    }
    if weights.total() <= 0.0 {
        bail!("weights_percent must have a positive sum");
    }
    Ok(())
}

fn validate_prefix(prefix: &str) -> Result<()> {
    let (address, length) = prefix
        .split_once('/')
        .with_context(|| format!("prefix {prefix} is not in CIDR form"))?;
    address
        .parse::<Ipv4Addr>()
        .with_context(|| format!("prefix {prefix} has an invalid address"))?;
    let length: u8 = length
        .parse()
        .with_context(|| format!("prefix {prefix} has an invalid length"))?;
    if length > 32 {
        bail!("prefix {prefix} has an invalid length");
    }
    Ok(())
}
