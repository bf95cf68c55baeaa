use serde::Deserialize;

use crate::model::state::QoSSample;

/// Relative importance of each QoS component, expressed in percent.
/// Weights must be non-negative with a positive sum; the config loader
/// enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct MetricWeights {
    #[serde(default = "default_latency_weight")]
    pub latency: f64,
    #[serde(default = "default_jitter_weight")]
    pub jitter: f64,
    #[serde(default = "default_loss_weight")]
    pub loss: f64,
    #[serde(default = "default_bandwidth_weight")]
    pub bandwidth: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            latency: default_latency_weight(),
            jitter: default_jitter_weight(),
            loss: default_loss_weight(),
            bandwidth: default_bandwidth_weight(),
        }
    }
}

impl MetricWeights {
    pub fn total(&self) -> f64 {
        self.latency + self.jitter + self.loss + self.bandwidth
    }
}

fn default_latency_weight() -> f64 {
    25.0
}

fn default_jitter_weight() -> f64 {
    35.0
}

fn default_loss_weight() -> f64 {
    30.0
}

fn default_bandwidth_weight() -> f64 {
    10.0
}

/// Normalization ceilings: a component at or beyond its ceiling
/// contributes its full weight to the cost.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NormalizationBounds {
    #[serde(default = "default_latency_max")]
    pub latency_max_ms: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: f64,
    #[serde(default = "default_loss_max")]
    pub loss_max_percent: f64,
    #[serde(default = "default_bandwidth_ref")]
    pub bandwidth_ref_mbps: f64,
}

impl Default for NormalizationBounds {
    fn default() -> Self {
        Self {
            latency_max_ms: default_latency_max(),
            jitter_max_ms: default_jitter_max(),
            loss_max_percent: default_loss_max(),
            bandwidth_ref_mbps: default_bandwidth_ref(),
        }
    }
}

fn default_latency_max() -> f64 {
    100.0
}

fn default_jitter_max() -> f64 {
    20.0
}

fn default_loss_max() -> f64 {
    100.0
}

fn default_bandwidth_ref() -> f64 {
    1000.0
}

/// Price a link from its QoS sample. The result is a weighted sum of
/// normalized components scaled to [0, 100], or infinity when the link is
/// unusable (total loss, or unmeasurable latency/jitter).
pub fn compute_cost(
    sample: &QoSSample,
    weights: &MetricWeights,
    bounds: &NormalizationBounds,
) -> f64 {
    if sample.loss_percent >= 100.0
        || !sample.latency_ms.is_finite()
        || !sample.jitter_ms.is_finite()
    {
        return f64::INFINITY;
    }
    let total = weights.total();
    if total <= 0.0 {
        return f64::INFINITY;
    }

    let latency_term = (sample.latency_ms / bounds.latency_max_ms).min(1.0);
    let jitter_term = (sample.jitter_ms / bounds.jitter_max_ms).min(1.0);
    let loss_term = (sample.loss_percent / bounds.loss_max_percent).min(1.0);
    let bandwidth_term = match sample.bandwidth_mbps {
        Some(bandwidth) if bandwidth > 0.0 => 1.0 - (bandwidth / bounds.bandwidth_ref_mbps).min(1.0),
        _ => 1.0,
    };

    let weighted = weights.latency * latency_term
        + weights.jitter * jitter_term
        + weights.loss * loss_term
        + weights.bandwidth * bandwidth_term;
    100.0 * weighted / total
}
