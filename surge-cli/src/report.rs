use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use common_metrics::snapshot::MetricsSnapshot;
use common_types::SurgeError;
use serde::Deserialize;
use surge_core::engine::RunSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub output: Option<PathBuf>,
}

pub fn render(
    format: ReportFormat,
    snapshot: &MetricsSnapshot,
    summary: &RunSummary,
) -> Result<String, SurgeError> {
    match format {
        ReportFormat::Text => Ok(render_text(snapshot, summary)),
        ReportFormat::Json => render_json(snapshot),
        ReportFormat::Csv => Ok(render_csv(snapshot)),
    }
}

pub fn render_text(snapshot: &MetricsSnapshot, summary: &RunSummary) -> String {
    let mut out = String::new();
    let protocol = snapshot.protocol.as_deref().unwrap_or("unknown");
    _ = writeln!(out, "Benchmark report ({protocol})");
    _ = writeln!(out, "generated at {}", Utc::now().to_rfc3339());
    _ = writeln!(out, "{}", "=".repeat(40));
    _ = writeln!(out, "  elapsed         {:.2} s", summary.elapsed.as_secs_f64());
    _ = writeln!(out, "  total ops       {}", snapshot.total_ops);
    _ = writeln!(
        out,
        "  success         {} ({:.2}%)",
        snapshot.success_ops, snapshot.success_rate
    );
    _ = writeln!(
        out,
        "  failed          {} ({:.2}% error rate)",
        snapshot.failed_ops, snapshot.error_rate
    );
    if snapshot.canceled_ops > 0 {
        _ = writeln!(out, "  canceled        {}", snapshot.canceled_ops);
    }
    _ = writeln!(
        out,
        "  reads / writes  {} / {}",
        snapshot.read_ops, snapshot.write_ops
    );
    _ = writeln!(
        out,
        "  throughput      {:.1} rps overall, {:.1} rps windowed",
        snapshot.overall_rps, snapshot.rps
    );
    _ = writeln!(out, "Latency (ms)");
    let latency = &snapshot.latency;
    _ = writeln!(
        out,
        "  min / avg / max {:.3} / {:.3} / {:.3}",
        latency.min_ms, latency.avg_ms, latency.max_ms
    );
    _ = writeln!(
        out,
        "  p50 / p90 / p95 / p99  {:.3} / {:.3} / {:.3} / {:.3}",
        latency.p50_ms, latency.p90_ms, latency.p95_ms, latency.p99_ms
    );
    if !snapshot.errors.is_empty() {
        _ = writeln!(out, "Errors");
        for (category, count) in &snapshot.errors {
            _ = writeln!(out, "  {category:<14} {count}");
        }
    }
    if let Some(protocol_metrics) = &snapshot.protocol_metrics {
        _ = writeln!(out, "Protocol ({protocol})");
        let pretty = serde_json::to_string_pretty(protocol_metrics)
            .unwrap_or_else(|_| protocol_metrics.to_string());
        for line in pretty.lines() {
            _ = writeln!(out, "  {line}");
        }
    }
    out
}

pub fn render_json(snapshot: &MetricsSnapshot) -> Result<String, SurgeError> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|err| SurgeError::Protocol(format!("failed to serialize snapshot: {err}")))
}

const CSV_HEADER: &[&str] = &[
    "protocol",
    "elapsed_secs",
    "total_ops",
    "success_ops",
    "failed_ops",
    "read_ops",
    "write_ops",
    "canceled_ops",
    "success_rate",
    "error_rate",
    "rps",
    "overall_rps",
    "latency_min_ms",
    "latency_avg_ms",
    "latency_p50_ms",
    "latency_p90_ms",
    "latency_p95_ms",
    "latency_p99_ms",
    "latency_max_ms",
];

pub fn render_csv(snapshot: &MetricsSnapshot) -> String {
    let latency = &snapshot.latency;
    let row = [
        snapshot.protocol.clone().unwrap_or_default(),
        format!("{:.2}", snapshot.elapsed_secs),
        snapshot.total_ops.to_string(),
        snapshot.success_ops.to_string(),
        snapshot.failed_ops.to_string(),
        snapshot.read_ops.to_string(),
        snapshot.write_ops.to_string(),
        snapshot.canceled_ops.to_string(),
        format!("{:.2}", snapshot.success_rate),
        format!("{:.2}", snapshot.error_rate),
        format!("{:.2}", snapshot.rps),
        format!("{:.2}", snapshot.overall_rps),
        format!("{:.3}", latency.min_ms),
        format!("{:.3}", latency.avg_ms),
        format!("{:.3}", latency.p50_ms),
        format!("{:.3}", latency.p90_ms),
        format!("{:.3}", latency.p95_ms),
        format!("{:.3}", latency.p99_ms),
        format!("{:.3}", latency.max_ms),
    ];
    format!("{}\n{}\n", CSV_HEADER.join(","), row.join(","))
}

pub fn write_report(report: &str, output: Option<&Path>) -> Result<(), SurgeError> {
    match output {
        Some(path) => std::fs::write(path, report).map_err(|err| {
            SurgeError::ConfigInvalid(format!("cannot write report to {path:?}: {err}"))
        }),
        None => {
            print!("{report}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common_metrics::MetricsCollector;
    use common_types::OperationResult;

    use super::*;

    fn sample() -> (MetricsSnapshot, RunSummary) {
        let collector = MetricsCollector::new();
        for ms in [5u64, 10, 20, 40] {
            collector.record(&OperationResult::ok(Duration::from_millis(ms)).read(ms < 20));
        }
        collector.record(&OperationResult::fail(
            Duration::from_millis(100),
            common_types::SurgeError::Transport("refused".into()),
        ));
        let summary = RunSummary {
            completed: 5,
            failed: 1,
            elapsed: Duration::from_secs(2),
            aborted_on_errors: false,
        };
        (collector.snapshot(), summary)
    }

    #[test]
    fn text_report_carries_the_headline_numbers() {
        let (snapshot, summary) = sample();
        let text = render_text(&snapshot, &summary);
        assert!(text.contains("total ops       5"));
        assert!(text.contains("failed          1"));
        assert!(text.contains("p50 / p90 / p95 / p99"));
        assert!(text.contains("connection"));
    }

    #[test]
    fn json_report_mirrors_the_snapshot() {
        let (snapshot, _) = sample();
        let json = render_json(&snapshot).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["total_ops"], 5);
        assert_eq!(parsed["failed_ops"], 1);
        assert!(parsed["latency"]["p99_ms"].is_number());
    }

    #[test]
    fn csv_report_is_one_row_under_a_fixed_header() {
        let (snapshot, _) = sample();
        let csv = render_csv(&snapshot);
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        let row = lines.next().unwrap();
        assert_eq!(lines.next(), None);
        assert_eq!(header.split(',').count(), CSV_HEADER.len());
        assert_eq!(row.split(',').count(), CSV_HEADER.len());
        assert!(header.starts_with("protocol,elapsed_secs,total_ops"));
    }
}
