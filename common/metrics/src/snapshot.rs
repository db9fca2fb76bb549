use std::collections::BTreeMap;

use serde::Serialize;

/// Owned, internally consistent view of the collector at a moment in time.
/// The JSON report is this struct serialized verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub elapsed_secs: f64,
    pub total_ops: u64,
    pub success_ops: u64,
    pub failed_ops: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub canceled_ops: u64,
    pub metric_anomaly_count: u64,
    /// Percent of non-canceled operations that succeeded.
    pub success_rate: f64,
    /// Percent of non-canceled operations that failed; cancellations are
    /// excluded from both sides of the ratio.
    pub error_rate: f64,
    pub read_write_ratio: f64,
    /// Sliding-window throughput.
    pub rps: f64,
    /// Whole-run throughput, total over elapsed.
    pub overall_rps: f64,
    pub latency: LatencySnapshot,
    pub errors: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_metrics: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySnapshot {
    pub samples: usize,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
}

impl MetricsSnapshot {
    /// Flat key/value form for text and CSV report generation.
    pub fn export(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(protocol) = &self.protocol {
            out.insert("protocol".into(), protocol.clone());
        }
        out.insert("elapsed_secs".into(), format!("{:.2}", self.elapsed_secs));
        out.insert("total_ops".into(), self.total_ops.to_string());
        out.insert("success_ops".into(), self.success_ops.to_string());
        out.insert("failed_ops".into(), self.failed_ops.to_string());
        out.insert("read_ops".into(), self.read_ops.to_string());
        out.insert("write_ops".into(), self.write_ops.to_string());
        out.insert("canceled_ops".into(), self.canceled_ops.to_string());
        out.insert(
            "metric_anomaly_count".into(),
            self.metric_anomaly_count.to_string(),
        );
        out.insert("success_rate".into(), format!("{:.2}", self.success_rate));
        out.insert("error_rate".into(), format!("{:.2}", self.error_rate));
        out.insert(
            "read_write_ratio".into(),
            format!("{:.2}", self.read_write_ratio),
        );
        out.insert("rps".into(), format!("{:.2}", self.rps));
        out.insert("overall_rps".into(), format!("{:.2}", self.overall_rps));
        out.insert("latency_min_ms".into(), format!("{:.3}", self.latency.min_ms));
        out.insert("latency_avg_ms".into(), format!("{:.3}", self.latency.avg_ms));
        out.insert("latency_max_ms".into(), format!("{:.3}", self.latency.max_ms));
        out.insert("latency_p50_ms".into(), format!("{:.3}", self.latency.p50_ms));
        out.insert("latency_p90_ms".into(), format!("{:.3}", self.latency.p90_ms));
        out.insert("latency_p95_ms".into(), format!("{:.3}", self.latency.p95_ms));
        out.insert("latency_p99_ms".into(), format!("{:.3}", self.latency.p99_ms));
        for (category, count) in &self.errors {
            out.insert(format!("errors_{category}"), count.to_string());
        }
        out
    }
}
