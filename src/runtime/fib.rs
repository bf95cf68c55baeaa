use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::process::Command;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::model::routing::DesiredRoute;

/// Host forwarding-table capability: install or withdraw one prefix.
/// Both operations are best effort from the daemon's point of view.
pub trait FibProgrammer: Send {
    fn add(&mut self, prefix: &str, next_hop: Ipv4Addr, interface: Option<&str>) -> Result<()>;
    fn delete(&mut self, prefix: &str) -> Result<()>;
}

/// Programs the kernel routing table through `ip route`. With `dry_run`
/// set the commands are logged instead of executed.
pub struct KernelFib {
    dry_run: bool,
}

impl KernelFib {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn run_ip(&self, args: &[&str]) -> Result<()> {
        if self.dry_run {
            info!("fib dry-run: ip route {}", args.join(" "));
            return Ok(());
        }
        let output = Command::new("ip").arg("route").args(args).output()?;
        if output.status.success() {
            return Ok(());
        }
        anyhow::bail!(
            "ip route {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}

impl FibProgrammer for KernelFib {
    fn add(&mut self, prefix: &str, next_hop: Ipv4Addr, interface: Option<&str>) -> Result<()> {
        let next_hop = next_hop.to_string();
        let mut args = vec!["replace", prefix, "via", next_hop.as_str()];
        if let Some(interface) = interface {
            args.extend(["dev", interface]);
        }
        self.run_ip(&args)
    }

    fn delete(&mut self, prefix: &str) -> Result<()> {
        self.run_ip(&["del", prefix])
    }
}

/// Used when forwarding-table programming is disabled.
pub struct NullFib;

impl FibProgrammer for NullFib {
    fn add(&mut self, prefix: &str, next_hop: Ipv4Addr, _interface: Option<&str>) -> Result<()> {
        debug!("fib disabled, skipping add {prefix} via {next_hop}");
        Ok(())
    }

    fn delete(&mut self, prefix: &str) -> Result<()> {
        debug!("fib disabled, skipping delete {prefix}");
        Ok(())
    }
}

/// Converges the kernel table toward a desired prefix map. `installed`
/// mirrors exactly what the last reconciliation successfully programmed,
/// so repeating a reconciliation with unchanged inputs performs no FIB
/// operations.
pub struct RouteReconciler {
    fib: Box<dyn FibProgrammer>,
    installed: BTreeMap<String, Ipv4Addr>,
}

impl RouteReconciler {
    pub fn new(fib: Box<dyn FibProgrammer>) -> Self {
        Self {
            fib,
            installed: BTreeMap::new(),
        }
    }

    pub fn installed(&self) -> &BTreeMap<String, Ipv4Addr> {
        &self.installed
    }

    pub fn reconcile(&mut self, desired: &BTreeMap<String, DesiredRoute>) {
        for (prefix, route) in desired {
            if self.installed.get(prefix) == Some(&route.next_hop) {
                continue;
            }
            let had_previous = self.installed.contains_key(prefix);
            let result = (|| -> Result<()> {
                if had_previous {
                    self.fib.delete(prefix)?;
                }
                self.fib
                    .add(prefix, route.next_hop, route.interface.as_deref())
            })();
            match result {
                Ok(()) => {
                    info!("route {} via {}", prefix, route.next_hop);
                    self.installed.insert(prefix.clone(), route.next_hop);
                }
                Err(err) => {
                    error!("failed to install route {} via {}: {err:#}", prefix, route.next_hop);
                    self.installed.remove(prefix);
                }
            }
        }

        let stale: Vec<String> = self
            .installed
            .keys()
            .filter(|prefix| !desired.contains_key(*prefix))
            .cloned()
            .collect();
        for prefix in stale {
            self.withdraw(&prefix);
        }
    }

    /// Withdraw every installed route. Shutdown path.
    pub fn flush(&mut self) {
        let prefixes: Vec<String> = self.installed.keys().cloned().collect();
        for prefix in prefixes {
            self.withdraw(&prefix);
        }
    }

    fn withdraw(&mut self, prefix: &str) {
        match self.fib.delete(prefix) {
            Ok(()) => {
                info!("removed route {prefix}");
                self.installed.remove(prefix);
            }
            Err(err) => {
                // Kept in the installed map so the next cycle retries.
                error!("failed to withdraw route {prefix}: {err:#}");
            }
        }
    }
}
