use common_types::{BenchmarkConfig, Operation};
use surge_core::factory::{fill_payload, OperationFactory};

/// Builds socket operations for the configured `test_case`; payload sizes
/// come from the benchmark config, and the connection details all live on
/// the adapter side.
pub struct TcpOperationFactory {
    bench: BenchmarkConfig,
}

impl TcpOperationFactory {
    pub fn new(bench: BenchmarkConfig) -> Self {
        Self { bench }
    }
}

impl OperationFactory for TcpOperationFactory {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    fn build(&self, job_id: u64) -> Operation {
        let verb = match self.bench.test_case.as_str() {
            "send_only" => "send_only",
            "receive_only" => "receive_only",
            "bidirectional" => "bidirectional",
            // `echo_test` and anything unrecognized drive the echo path.
            _ => "echo_test",
        };
        let op = Operation::new(verb, format!("i:{job_id}"));
        match verb {
            "receive_only" => op
                .with_param("max_bytes", self.bench.data_size.max(1))
                .with_op_kind(true),
            _ => op
                .with_value(fill_payload(self.bench.data_size.max(1)))
                .with_op_kind(false),
        }
    }
}
