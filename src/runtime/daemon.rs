use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::model::lsdb::{graph_from_entries, LsdbEntry};
use crate::model::messages::{decode_packet, encode_packet, HelloPacket, LsaPacket, Packet};
use crate::model::routing::{DesiredRoute, RoutingTable};
use crate::model::state::{LinkSnapshot, NeighborConfig, NeighborTable};
use crate::protocols::cost::compute_cost;
use crate::protocols::link_state::{LinkStatePlane, LsaDisposition};
use crate::protocols::spf::compute_spf;
use crate::runtime::config::DaemonConfig;
use crate::runtime::fib::{FibProgrammer, KernelFib, NullFib, RouteReconciler};
use crate::runtime::probe::{LinkProber, PingProber};
use crate::runtime::transport::UdpTransport;

const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Everything the workers mutate, behind one mutex. SPF and FIB
/// reconciliation take snapshots out of here, compute unlocked, and
/// apply results back in.
struct SharedState {
    neighbors: NeighborTable,
    plane: LinkStatePlane,
    routing_table: RoutingTable,
}

pub struct Daemon {
    cfg: DaemonConfig,
    transport: UdpTransport,
    state: Mutex<SharedState>,
    reconciler: Mutex<RouteReconciler>,
    prober: Box<dyn LinkProber>,
    running: AtomicBool,
}

impl Daemon {
    pub fn new(cfg: DaemonConfig) -> Result<Self> {
        let transport = UdpTransport::bind(cfg.listen_ip, cfg.listen_port).with_context(|| {
            format!(
                "failed to bind UDP socket on {}:{}",
                cfg.listen_ip, cfg.listen_port
            )
        })?;

        // Every neighbor link implies a connected /24 this router covers.
        let mut local_prefixes = cfg.local_prefixes.clone();
        for neighbor in &cfg.neighbors {
            local_prefixes.insert(infer_link_prefix(neighbor.ip));
        }

        let fib: Box<dyn FibProgrammer> = if cfg.fib.enabled {
            Box::new(KernelFib::new(cfg.fib.dry_run))
        } else {
            Box::new(NullFib)
        };

        let state = SharedState {
            neighbors: NeighborTable::new(cfg.neighbors.clone()),
            plane: LinkStatePlane::new(cfg.router_id.clone(), local_prefixes, unix_now()),
            routing_table: RoutingTable::new(),
        };

        Ok(Self {
            cfg,
            transport,
            state: Mutex::new(state),
            reconciler: Mutex::new(RouteReconciler::new(fib)),
            prober: Box::new(PingProber),
            running: AtomicBool::new(true),
        })
    }

    /// Launch the receiver, hello and metric workers, flood the initial
    /// self LSA, and block until shutdown is requested. On the way out
    /// every installed route is withdrawn.
    pub fn run(self: Arc<Self>) -> Result<()> {
        Self::install_signal_handler(&self)?;

        info!(
            "qlsrd start: router_id={} listen={}:{} neighbors={:?}",
            self.cfg.router_id,
            self.cfg.listen_ip,
            self.cfg.listen_port,
            self.cfg
                .neighbors
                .iter()
                .map(|neighbor| neighbor.router_id.as_str())
                .collect::<Vec<_>>()
        );

        let workers = Self::spawn_workers(&self);

        let initial = match self.state.lock() {
            Ok(state) => Some(state.plane.self_lsa()),
            Err(_) => None,
        };
        if let Some(lsa) = initial {
            self.flood(&Packet::Lsa(lsa), None);
        }

        while self.running.load(Ordering::Relaxed) {
            thread::sleep(SLEEP_SLICE);
        }

        for worker in workers {
            let _ = worker.join();
        }
        if let Ok(mut reconciler) = self.reconciler.lock() {
            reconciler.flush();
        }
        info!("qlsrd stopped");
        Ok(())
    }

    /// Request a cooperative shutdown; workers observe the flag between
    /// iterations and on receive-timeout boundaries.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn install_signal_handler(daemon: &Arc<Self>) -> Result<()> {
        let daemon = Arc::clone(daemon);
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            daemon.stop();
        })
        .context("failed to install signal handler")?;
        Ok(())
    }

    fn spawn_workers(daemon: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let spawn = |name: &str, body: fn(&Daemon)| {
            let daemon = Arc::clone(daemon);
            thread::Builder::new()
                .name(format!("{}-{name}", daemon.cfg.router_id))
                .spawn(move || body(&daemon))
        };

        let mut workers = Vec::new();
        for (name, body) in [
            ("rx", Self::receiver_loop as fn(&Daemon)),
            ("hello", Self::hello_loop),
            ("metrics", Self::metric_loop),
        ] {
            match spawn(name, body) {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!("failed to spawn {name} worker: {err}"),
            }
        }
        workers
    }

    fn receiver_loop(&self) {
        while self.running.load(Ordering::Relaxed) {
            let received = match self.transport.recv(RECV_POLL_TIMEOUT) {
                Ok(received) => received,
                Err(err) => {
                    if self.running.load(Ordering::Relaxed) {
                        warn!("socket receive failed: {err}");
                    }
                    break;
                }
            };
            let Some((payload, addr)) = received else {
                continue;
            };
            let packet = match decode_packet(&payload) {
                Ok(packet) => packet,
                Err(err) => {
                    debug!("drop malformed packet from {addr}: {err:#}");
                    continue;
                }
            };
            match packet {
                Packet::Hello(hello) => self.handle_hello(&hello),
                Packet::Lsa(lsa) => self.handle_lsa(lsa, addr),
            }
        }
    }

    fn handle_hello(&self, hello: &HelloPacket) {
        if hello.router_id == self.cfg.router_id {
            return;
        }
        let became_up = match self.state.lock() {
            Ok(mut state) => state.neighbors.mark_hello(&hello.router_id, unix_now()),
            Err(_) => return,
        };
        if became_up {
            info!(
                "{} established adjacency with {}",
                self.cfg.router_id, hello.router_id
            );
        }
    }

    fn handle_lsa(&self, lsa: LsaPacket, from: SocketAddr) {
        let disposition = match self.state.lock() {
            Ok(mut state) => state.plane.accept(&lsa, unix_now()),
            Err(_) => return,
        };
        match disposition {
            LsaDisposition::SelfOrigin => {}
            LsaDisposition::Stale => {
                debug!("drop stale lsa origin={} seq={}", lsa.origin, lsa.seq);
            }
            LsaDisposition::Stored { reflood } => {
                debug!("stored lsa origin={} seq={}", lsa.origin, lsa.seq);
                if let Some(packet) = reflood {
                    // Split horizon: identify the forwarding neighbor by
                    // its source address and skip it on the way back out.
                    let sender = match (from, self.state.lock()) {
                        (SocketAddr::V4(addr), Ok(state)) => {
                            state.neighbors.by_ip(*addr.ip()).map(str::to_string)
                        }
                        _ => None,
                    };
                    self.flood(&Packet::Lsa(packet), sender.as_deref());
                }
                self.recompute_routes();
            }
        }
    }

    fn hello_loop(&self) {
        while self.running.load(Ordering::Relaxed) {
            let now = unix_now();
            let hello = Packet::Hello(HelloPacket {
                router_id: self.cfg.router_id.clone(),
                timestamp: now,
            });
            self.flood(&hello, None);
            self.check_dead_neighbors(now);
            self.sleep_while_running(self.cfg.hello_interval);
        }
    }

    fn check_dead_neighbors(&self, now: f64) {
        let lsa = match self.state.lock() {
            Ok(mut state) => {
                let expired = state.neighbors.expire(now, self.cfg.dead_interval);
                let mut link_dropped = false;
                for router_id in &expired {
                    warn!("{} lost adjacency to {}", self.cfg.router_id, router_id);
                    link_dropped |= state.plane.drop_local_link(router_id);
                }
                link_dropped.then(|| state.plane.originate(now))
            }
            Err(_) => None,
        };
        if let Some(lsa) = lsa {
            self.flood(&Packet::Lsa(lsa), None);
            self.recompute_routes();
        }
    }

    fn metric_loop(&self) {
        while self.running.load(Ordering::Relaxed) {
            let mut changed = false;
            let configs = self.neighbor_configs();
            // Probes run serially so concurrent ICMP bursts do not skew
            // each other's jitter on the shared local link.
            for config in &configs {
                if !self.running.load(Ordering::Relaxed) {
                    break;
                }
                let sample = self.prober.probe(
                    config.ip,
                    self.cfg.ping_count,
                    self.cfg.ping_interval,
                    config.bandwidth_mbps,
                );
                let cost = compute_cost(&sample, &self.cfg.weights, &self.cfg.normalization);
                if let Ok(mut state) = self.state.lock() {
                    state
                        .neighbors
                        .set_sample(&config.router_id, sample.clone());
                    let is_up = state
                        .neighbors
                        .get(&config.router_id)
                        .is_some_and(|neighbor| neighbor.is_up);
                    if is_up {
                        let snapshot = LinkSnapshot {
                            cost,
                            sample,
                            updated_at: unix_now(),
                        };
                        changed |= state.plane.update_local_link(&config.router_id, snapshot);
                    }
                }
            }

            if changed {
                let lsa = match self.state.lock() {
                    Ok(mut state) => Some(state.plane.originate(unix_now())),
                    Err(_) => None,
                };
                if let Some(lsa) = lsa {
                    debug!("local links changed, flooding lsa seq={}", lsa.seq);
                    self.flood(&Packet::Lsa(lsa), None);
                    self.recompute_routes();
                }
            }

            self.purge_stale_lsas();
            self.sleep_while_running(self.cfg.metric_interval);
        }
    }

    fn purge_stale_lsas(&self) {
        let purged = match self.state.lock() {
            Ok(mut state) => state.plane.age_out(unix_now()),
            Err(_) => return,
        };
        if !purged.is_empty() {
            info!(
                "{} removed stale LSAs: {}",
                self.cfg.router_id,
                purged.join(", ")
            );
            self.recompute_routes();
        }
    }

    /// One SPF/FIB cycle: snapshot under the lock, compute and program
    /// the kernel outside it, apply the routing table back under it.
    fn recompute_routes(&self) {
        let (lsdb_snapshot, local_prefixes, neighbors) = match self.state.lock() {
            Ok(state) => (
                state.plane.lsdb().snapshot(),
                state.plane.local_prefixes().clone(),
                state
                    .neighbors
                    .iter()
                    .map(|(router_id, neighbor)| (router_id.clone(), neighbor.config.clone()))
                    .collect::<BTreeMap<String, NeighborConfig>>(),
            ),
            Err(_) => return,
        };

        let graph = graph_from_entries(&lsdb_snapshot);
        let routes = compute_spf(&graph, &self.cfg.router_id);
        let desired = desired_routes(
            &routes,
            &lsdb_snapshot,
            &self.cfg.route_mappings,
            &neighbors,
            &local_prefixes,
        );

        if let Ok(mut reconciler) = self.reconciler.lock() {
            reconciler.reconcile(&desired);
        }
        if let Ok(mut state) = self.state.lock() {
            state.routing_table = routes;
        }
    }

    fn flood(&self, packet: &Packet, exclude: Option<&str>) {
        let payload = match encode_packet(packet) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("skip outbound packet, encode failure: {err:#}");
                return;
            }
        };
        for config in self.neighbor_configs() {
            if Some(config.router_id.as_str()) == exclude {
                continue;
            }
            if let Err(err) = self.transport.send(&payload, config.ip, config.port) {
                debug!("failed to send to {}: {err}", config.router_id);
            }
        }
    }

    /// Immutable neighbor definitions, copied out of the neighbor table
    /// so sends and probes never run under the state lock.
    fn neighbor_configs(&self) -> Vec<NeighborConfig> {
        match self.state.lock() {
            Ok(state) => state
                .neighbors
                .iter()
                .map(|(_, neighbor)| neighbor.config.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn sleep_while_running(&self, seconds: f64) {
        let deadline = unix_now() + seconds;
        while self.running.load(Ordering::Relaxed) && unix_now() < deadline {
            thread::sleep(SLEEP_SLICE);
        }
    }
}

/// Map each routed destination to the prefixes it should attract, keyed
/// by prefix with the resolved next-hop address and interface. Prefixes
/// this router covers locally are excluded; the kernel already reaches
/// them as connected.
fn desired_routes(
    routes: &RoutingTable,
    lsdb: &BTreeMap<String, LsdbEntry>,
    route_mappings: &BTreeMap<String, BTreeSet<String>>,
    neighbors: &BTreeMap<String, NeighborConfig>,
    local_prefixes: &BTreeSet<String>,
) -> BTreeMap<String, DesiredRoute> {
    let mut desired = BTreeMap::new();
    for (destination, path) in routes {
        let Some(next_hop) = neighbors.get(&path.first_hop) else {
            continue;
        };
        for prefix in destination_prefixes(destination, lsdb, route_mappings, neighbors) {
            if local_prefixes.contains(&prefix) {
                continue;
            }
            desired.insert(
                prefix,
                DesiredRoute {
                    next_hop: next_hop.ip,
                    interface: next_hop.interface.clone(),
                },
            );
        }
    }
    desired
}

/// Prefix sources for a destination, in priority-free union: whatever it
/// advertised in its LSA, any statically mapped prefixes, and as a last
/// resort the inferred /24 of its link when it is a direct neighbor.
fn destination_prefixes(
    destination: &str,
    lsdb: &BTreeMap<String, LsdbEntry>,
    route_mappings: &BTreeMap<String, BTreeSet<String>>,
    neighbors: &BTreeMap<String, NeighborConfig>,
) -> BTreeSet<String> {
    let mut prefixes = route_mappings
        .get(destination)
        .cloned()
        .unwrap_or_default();
    if let Some(entry) = lsdb.get(destination) {
        prefixes.extend(entry.prefixes.iter().cloned());
    }
    if prefixes.is_empty() {
        if let Some(config) = neighbors.get(destination) {
            prefixes.insert(infer_link_prefix(config.ip));
        }
    }
    prefixes
}

fn infer_link_prefix(ip: Ipv4Addr) -> String {
    let octets = ip.octets();
    format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
