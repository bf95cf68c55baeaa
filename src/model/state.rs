use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Republish thresholds for a local link. Deltas at or below these are
/// treated as measurement noise and do not trigger a new LSA.
const COST_CHANGE_THRESHOLD: f64 = 0.5;
const QOS_CHANGE_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct QoSSample {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_percent: f64,
    pub bandwidth_mbps: Option<f64>,
}

impl QoSSample {
    /// The sample reported for a link that could not be measured: infinite
    /// latency and jitter, total loss. The bandwidth hint is static
    /// configuration and survives measurement failure.
    pub fn unusable(bandwidth_hint: Option<f64>) -> Self {
        Self {
            latency_ms: f64::INFINITY,
            jitter_ms: f64::INFINITY,
            loss_percent: 100.0,
            bandwidth_mbps: bandwidth_hint,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.loss_percent < 100.0 && self.latency_ms.is_finite() && self.jitter_ms.is_finite()
    }
}

/// One priced link toward a neighbor: the scalar cost plus the QoS sample
/// it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSnapshot {
    pub cost: f64,
    pub sample: QoSSample,
    pub updated_at: f64,
}

impl LinkSnapshot {
    /// Whether replacing `self` with `candidate` is worth a new LSA.
    /// Two unusable snapshots are never materially different.
    pub fn materially_differs(&self, candidate: &LinkSnapshot) -> bool {
        if !self.cost.is_finite() && !candidate.cost.is_finite() {
            return false;
        }
        if (self.cost - candidate.cost).abs() > COST_CHANGE_THRESHOLD {
            return true;
        }
        if (self.sample.latency_ms - candidate.sample.latency_ms).abs() > QOS_CHANGE_THRESHOLD {
            return true;
        }
        if (self.sample.jitter_ms - candidate.sample.jitter_ms).abs() > QOS_CHANGE_THRESHOLD {
            return true;
        }
        (self.sample.loss_percent - candidate.sample.loss_percent).abs() > QOS_CHANGE_THRESHOLD
    }
}

/// Static neighbor definition from the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborConfig {
    pub router_id: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub interface: Option<String>,
    pub bandwidth_mbps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NeighborState {
    pub config: NeighborConfig,
    pub sample: QoSSample,
    pub last_hello: Option<f64>,
    pub is_up: bool,
}

/// Per-neighbor adjacency state, keyed by router id. Liveness follows the
/// Hello/dead-interval state machine: a valid Hello brings the adjacency
/// up, silence longer than the dead interval takes it down.
#[derive(Debug, Default)]
pub struct NeighborTable {
    neighbors: BTreeMap<String, NeighborState>,
}

impl NeighborTable {
    pub fn new(configs: Vec<NeighborConfig>) -> Self {
        let neighbors = configs
            .into_iter()
            .map(|config| {
                let sample = QoSSample::unusable(config.bandwidth_mbps);
                (
                    config.router_id.clone(),
                    NeighborState {
                        config,
                        sample,
                        last_hello: None,
                        is_up: false,
                    },
                )
            })
            .collect();
        Self { neighbors }
    }

    /// Record a Hello from `router_id`. Returns true on the DOWN -> UP
    /// transition; unknown ids are ignored and return false.
    pub fn mark_hello(&mut self, router_id: &str, now: f64) -> bool {
        let Some(neighbor) = self.neighbors.get_mut(router_id) else {
            return false;
        };
        let was_up = neighbor.is_up;
        neighbor.last_hello = Some(now);
        neighbor.is_up = true;
        !was_up
    }

    /// Take down every adjacency whose last Hello is older than the dead
    /// interval. Expired neighbors get their metrics reset to unusable.
    /// Returns the ids that transitioned UP -> DOWN.
    pub fn expire(&mut self, now: f64, dead_interval: f64) -> Vec<String> {
        let mut expired = Vec::new();
        for (router_id, neighbor) in &mut self.neighbors {
            if !neighbor.is_up {
                continue;
            }
            let Some(last_hello) = neighbor.last_hello else {
                continue;
            };
            if now - last_hello > dead_interval {
                neighbor.is_up = false;
                neighbor.last_hello = None;
                neighbor.sample = QoSSample::unusable(neighbor.config.bandwidth_mbps);
                expired.push(router_id.clone());
            }
        }
        expired
    }

    pub fn set_sample(&mut self, router_id: &str, sample: QoSSample) {
        if let Some(neighbor) = self.neighbors.get_mut(router_id) {
            neighbor.sample = sample;
        }
    }

    pub fn get(&self, router_id: &str) -> Option<&NeighborState> {
        self.neighbors.get(router_id)
    }

    pub fn by_ip(&self, ip: Ipv4Addr) -> Option<&str> {
        self.neighbors
            .values()
            .find(|neighbor| neighbor.config.ip == ip)
            .map(|neighbor| neighbor.config.router_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NeighborState)> {
        self.neighbors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(id: &str, ip: &str) -> NeighborConfig {
        NeighborConfig {
            router_id: id.to_string(),
            ip: ip.parse().expect("test ip"),
            port: 55_000,
            interface: None,
            bandwidth_mbps: Some(100.0),
        }
    }

    fn snapshot(cost: f64, latency: f64, jitter: f64, loss: f64) -> LinkSnapshot {
        LinkSnapshot {
            cost,
            sample: QoSSample {
                latency_ms: latency,
                jitter_ms: jitter,
                loss_percent: loss,
                bandwidth_mbps: Some(100.0),
            },
            updated_at: 0.0,
        }
    }

    #[test]
    fn hello_brings_adjacency_up_once() {
        let mut table = NeighborTable::new(vec![neighbor("r2", "10.0.12.2")]);
        assert!(table.mark_hello("r2", 1.0));
        assert!(!table.mark_hello("r2", 2.0));
        let state = table.get("r2").expect("neighbor should exist");
        assert!(state.is_up);
        assert_eq!(state.last_hello, Some(2.0));
    }

    #[test]
    fn hello_from_unknown_id_is_ignored() {
        let mut table = NeighborTable::new(vec![neighbor("r2", "10.0.12.2")]);
        assert!(!table.mark_hello("r9", 1.0));
        assert!(table.get("r9").is_none());
    }

    #[test]
    fn expire_takes_down_silent_neighbors() {
        let mut table = NeighborTable::new(vec![
            neighbor("r2", "10.0.12.2"),
            neighbor("r3", "10.0.13.2"),
        ]);
        table.mark_hello("r2", 2.0);
        table.mark_hello("r3", 5.0);

        let expired = table.expire(5.1, 3.0);
        assert_eq!(expired, vec!["r2".to_string()]);

        let down = table.get("r2").expect("neighbor should exist");
        assert!(!down.is_up);
        assert!(down.last_hello.is_none());
        assert!(!down.sample.is_usable());
        assert_eq!(down.sample.bandwidth_mbps, Some(100.0));

        let up = table.get("r3").expect("neighbor should exist");
        assert!(up.is_up);
    }

    #[test]
    fn expire_skips_neighbors_never_heard_from() {
        let mut table = NeighborTable::new(vec![neighbor("r2", "10.0.12.2")]);
        assert!(table.expire(100.0, 3.0).is_empty());
    }

    #[test]
    fn lookup_by_source_address() {
        let table = NeighborTable::new(vec![neighbor("r2", "10.0.12.2")]);
        assert_eq!(table.by_ip("10.0.12.2".parse().expect("ip")), Some("r2"));
        assert_eq!(table.by_ip("10.0.99.9".parse().expect("ip")), None);
    }

    #[test]
    fn small_deltas_are_not_material() {
        let current = snapshot(10.0, 20.0, 2.0, 0.0);
        assert!(!current.materially_differs(&snapshot(10.4, 20.5, 2.5, 0.5)));
        assert!(current.materially_differs(&snapshot(10.6, 20.0, 2.0, 0.0)));
        assert!(current.materially_differs(&snapshot(10.0, 21.5, 2.0, 0.0)));
        assert!(current.materially_differs(&snapshot(10.0, 20.0, 3.5, 0.0)));
        assert!(current.materially_differs(&snapshot(10.0, 20.0, 2.0, 1.5)));
    }

    #[test]
    fn two_unusable_snapshots_are_equivalent() {
        let a = snapshot(f64::INFINITY, f64::INFINITY, f64::INFINITY, 100.0);
        let b = snapshot(f64::INFINITY, f64::INFINITY, f64::INFINITY, 100.0);
        assert!(!a.materially_differs(&b));
        assert!(a.materially_differs(&snapshot(10.0, 20.0, 2.0, 0.0)));
    }
}
