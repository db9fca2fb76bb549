//! Command-line front-end: parse flags, assemble the layered configuration,
//! connect the selected adapter, drive the engine, and emit the report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use surge_cli::cli::Cli;
use surge_cli::registry::AdapterRegistry;
use surge_cli::{config, report};
use surge_core::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_ABORTED: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let code = run(cli).await;
    std::process::exit(code);
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> i32 {
    let (runner_config, protocol) = match config::load(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("{err}");
            return EXIT_CONFIG;
        }
    };

    let registry = AdapterRegistry::default();
    let (adapter, factory) = match registry.build(&protocol, &runner_config) {
        Ok(pair) => pair,
        Err(err) => {
            error!("{err}");
            return EXIT_CONFIG;
        }
    };

    if let Err(err) = adapter.connect().await {
        error!("failed to connect {protocol} adapter: {err}");
        return EXIT_CONFIG;
    }

    let engine = match Engine::new(runner_config.benchmark.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            error!("{err}");
            drop(adapter.close().await);
            return EXIT_CONFIG;
        }
    };

    let cancel = CancellationToken::new();
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, winding down");
                interrupted.store(true, Ordering::Relaxed);
                cancel.cancel();
            }
        });
    }

    let collector = adapter.collector();
    let summary = match engine
        .run(adapter.clone(), factory, collector.clone(), cancel)
        .await
    {
        Ok(summary) => summary,
        Err(err) => {
            error!("run failed: {err}");
            drop(adapter.close().await);
            return if err.is_fatal() { EXIT_CONFIG } else { EXIT_ABORTED };
        }
    };

    if let Err(err) = adapter.close().await {
        error!("failed to close {protocol} adapter: {err}");
    }

    let snapshot = collector.snapshot();
    let rendered = match report::render(runner_config.report.format, &snapshot, &summary) {
        Ok(rendered) => rendered,
        Err(err) => {
            error!("{err}");
            return EXIT_ABORTED;
        }
    };
    if let Err(err) = report::write_report(&rendered, runner_config.report.output.as_deref()) {
        error!("{err}");
        return EXIT_ABORTED;
    }

    if interrupted.load(Ordering::Relaxed) {
        EXIT_INTERRUPTED
    } else if summary.aborted_on_errors {
        error!(
            "run aborted after exceeding the consecutive-failure threshold ({} completed)",
            summary.completed
        );
        EXIT_ABORTED
    } else {
        EXIT_OK
    }
}
