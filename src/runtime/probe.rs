use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::model::state::QoSSample;

/// Round-trip measurement toward a neighbor address. Implementations may
/// block for the full probe duration but must never fail into the
/// caller: an unmeasurable link is reported as an unusable sample.
pub trait LinkProber: Send + Sync {
    fn probe(
        &self,
        ip: Ipv4Addr,
        count: u32,
        interval_s: f64,
        bandwidth_hint: Option<f64>,
    ) -> QoSSample;
}

/// Probes by running the system `ping` and parsing its output. Handles
/// both iputils and busybox summary formats.
pub struct PingProber;

impl LinkProber for PingProber {
    fn probe(
        &self,
        ip: Ipv4Addr,
        count: u32,
        interval_s: f64,
        bandwidth_hint: Option<f64>,
    ) -> QoSSample {
        // LANG=C pins the output to the English format the parser expects.
        let output = Command::new("env")
            .args([
                "LANG=C",
                "ping",
                "-c",
                &count.to_string(),
                "-i",
                &interval_s.to_string(),
                &ip.to_string(),
            ])
            .output();

        let text = match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                text
            }
            Err(err) => {
                warn!("failed to run ping toward {ip}: {err}");
                return QoSSample::unusable(bandwidth_hint);
            }
        };

        match parse_ping_output(&text, bandwidth_hint) {
            Some(sample) => sample,
            None => {
                warn!("unparsable ping output for {ip}");
                QoSSample::unusable(bandwidth_hint)
            }
        }
    }
}

fn loss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("static regex")
    })
}

fn rtt_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // iputils: rtt min/avg/max/mdev = a/b/c/d ms
    // busybox: round-trip min/avg/max = a/b/c ms
    RE.get_or_init(|| {
        Regex::new(
            r"(?:=|:)\s*(?P<min>\d+\.?\d*)/(?P<avg>\d+\.?\d*)/(?P<max>\d+\.?\d*)(?:/(?P<mdev>\d+\.?\d*))?",
        )
        .expect("static regex")
    })
}

fn per_packet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time[=<](\d+\.?\d*)\s*ms").expect("static regex"))
}

/// Extract a QoS sample from raw ping output. Latency is the reported
/// average; jitter is the population standard deviation of the
/// per-packet round trips when at least two were seen, the tool-reported
/// mdev otherwise, and max - min as the last resort. Returns None when
/// the loss or RTT summary is missing.
pub fn parse_ping_output(output: &str, bandwidth_hint: Option<f64>) -> Option<QoSSample> {
    let loss_caps = loss_re().captures(output)?;
    let rtt_caps = rtt_summary_re().captures(output)?;

    let loss_percent: f64 = loss_caps.get(1)?.as_str().parse().ok()?;
    let min: f64 = rtt_caps.name("min")?.as_str().parse().ok()?;
    let avg: f64 = rtt_caps.name("avg")?.as_str().parse().ok()?;
    let max: f64 = rtt_caps.name("max")?.as_str().parse().ok()?;
    let mdev: Option<f64> = rtt_caps
        .name("mdev")
        .and_then(|m| m.as_str().parse().ok());

    let samples: Vec<f64> = per_packet_re()
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();

    let jitter_ms = if samples.len() >= 2 {
        population_std_dev(&samples)
    } else if let Some(mdev) = mdev {
        mdev
    } else {
        max - min
    };

    Some(QoSSample {
        latency_ms: avg,
        jitter_ms,
        loss_percent,
        bandwidth_mbps: bandwidth_hint,
    })
}

fn population_std_dev(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|sample| (sample - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt()
}
