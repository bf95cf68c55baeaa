use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::state::{LinkSnapshot, QoSSample};

/// One UDP datagram carries exactly one JSON-encoded packet, discriminated
/// by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Packet {
    Hello(HelloPacket),
    Lsa(LsaPacket),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPacket {
    pub router_id: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsaPacket {
    pub origin: String,
    pub seq: u64,
    pub ttl: i64,
    #[serde(default)]
    pub prefixes: BTreeSet<String>,
    #[serde(default)]
    pub links: BTreeMap<String, LinkAttrs>,
}

/// Per-link attributes as they travel on the wire. JSON has no
/// representation for non-finite floats, so every field is optional and
/// unusable components are carried as `null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkAttrs {
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub jitter_ms: Option<f64>,
    #[serde(default)]
    pub loss_percent: Option<f64>,
    #[serde(default)]
    pub bandwidth_mbps: Option<f64>,
}

impl LinkAttrs {
    pub fn from_snapshot(snapshot: &LinkSnapshot) -> Self {
        Self {
            cost: finite_or_none(snapshot.cost),
            latency_ms: finite_or_none(snapshot.sample.latency_ms),
            jitter_ms: finite_or_none(snapshot.sample.jitter_ms),
            loss_percent: finite_or_none(snapshot.sample.loss_percent),
            bandwidth_mbps: snapshot.sample.bandwidth_mbps.and_then(finite_or_none),
        }
    }

    /// Rebuild the snapshot, filling absent components with their unusable
    /// extremes (missing latency or jitter means unmeasurable, missing
    /// loss means total loss, missing cost falls back to the ceiling).
    pub fn into_snapshot(self, now: f64) -> LinkSnapshot {
        LinkSnapshot {
            cost: self.cost.unwrap_or(100.0),
            sample: QoSSample {
                latency_ms: self.latency_ms.unwrap_or(f64::INFINITY),
                jitter_ms: self.jitter_ms.unwrap_or(f64::INFINITY),
                loss_percent: self.loss_percent.unwrap_or(100.0),
                bandwidth_mbps: self.bandwidth_mbps,
            },
            updated_at: now,
        }
    }
}

fn finite_or_none(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    serde_json::to_vec(packet).context("failed to encode packet")
}

pub fn decode_packet(data: &[u8]) -> Result<Packet> {
    serde_json::from_slice(data).context("failed to decode packet")
}
