use std::path::PathBuf;

use clap::Parser;

use crate::report::ReportFormat;

/// Multi-protocol load generator.
#[derive(Debug, Parser)]
#[command(name = "surge", version, about)]
pub struct Cli {
    /// YAML configuration file.
    #[arg(long, short = 'f')]
    pub config: Option<PathBuf>,

    /// Protocol to drive: http, kafka, redis, or tcp.
    #[arg(long, short = 'P')]
    pub protocol: Option<String>,

    /// HTTP base URL.
    #[arg(long, short = 'u')]
    pub url: Option<String>,

    /// Kafka bootstrap servers, comma-separated.
    #[arg(long, short = 'b')]
    pub brokers: Option<String>,

    /// Redis or TCP target address as host:port.
    #[arg(long, short = 'a')]
    pub addr: Option<String>,

    /// Total number of operations; 0 means duration-bounded.
    #[arg(long, short = 'n')]
    pub total: Option<u64>,

    /// Number of concurrent workers.
    #[arg(long, short = 'c')]
    pub parallels: Option<usize>,

    /// Per-operation timeout, e.g. "2s" or "500ms".
    #[arg(long)]
    pub timeout: Option<String>,

    /// Wall-clock cap for the run, e.g. "30s".
    #[arg(long)]
    pub duration: Option<String>,

    /// Window over which concurrency ramps up to --parallels.
    #[arg(long = "rampup")]
    pub ramp_up: Option<String>,

    /// HTTP method for the default request.
    #[arg(long, short = 'm')]
    pub method: Option<String>,

    /// HTTP path for the default request.
    #[arg(long, short = 'p')]
    pub path: Option<String>,

    /// Kafka topic.
    #[arg(long, short = 't')]
    pub topic: Option<String>,

    /// Kafka client id.
    #[arg(long)]
    pub client_id: Option<String>,

    /// Workload selector, e.g. produce, consume, echo_test.
    #[arg(long)]
    pub test_case: Option<String>,

    /// Report shape.
    #[arg(long, value_enum)]
    pub report: Option<ReportFormat>,

    /// Write the report to a file instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}
