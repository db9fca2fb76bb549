//! The four configuration sources overlaid end-to-end: defaults, a YAML
//! file on disk, `<PROTO>_RUNNER_*` environment variables, and flags.

use std::time::Duration;

use clap::Parser;
use surge_cli::cli::Cli;
use surge_cli::config;

fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("surge-{name}-{}.yaml", std::process::id()));
    std::fs::write(&path, contents).expect("failed to write config file");
    path
}

#[test]
fn file_env_and_flags_overlay_in_priority_order() {
    let path = write_config(
        "layering",
        r#"
        http:
          base_url: "http://file-host:8080"
          path: /from-file
        benchmark:
          total: 100
          parallels: 2
          timeout: "1s"
        "#,
    );
    std::env::set_var("HTTP_RUNNER_TOTAL", "200");
    std::env::set_var("HTTP_RUNNER_PATH", "/from-env");
    std::env::set_var("HTTP_RUNNER_TIMEOUT", "3s");

    let cli = Cli::parse_from([
        "surge",
        "-f",
        path.to_str().unwrap(),
        "-n",
        "300",
        "-p",
        "/from-flag",
    ]);
    let (loaded, protocol) = config::load(&cli).expect("load failed");

    assert_eq!(protocol, "http");
    let http = loaded.http.as_ref().unwrap();
    // Untouched by env or flags: the file value stands.
    assert_eq!(http.base_url, "http://file-host:8080");
    // Env beats the file, flags beat the env.
    assert_eq!(loaded.benchmark.timeout, Duration::from_secs(3));
    assert_eq!(http.path, "/from-flag");
    assert_eq!(loaded.benchmark.total, 300);
    // The file's untouched benchmark keys survive both overlays.
    assert_eq!(loaded.benchmark.parallels, 2);

    std::env::remove_var("HTTP_RUNNER_TOTAL");
    std::env::remove_var("HTTP_RUNNER_PATH");
    std::env::remove_var("HTTP_RUNNER_TIMEOUT");
    drop(std::fs::remove_file(path));
}

#[test]
fn a_missing_config_file_is_a_configuration_error() {
    let cli = Cli::parse_from(["surge", "-f", "/nonexistent/surge.yaml"]);
    let err = config::load(&cli).unwrap_err();
    assert!(matches!(err, common_types::SurgeError::ConfigInvalid(_)));
}

#[test]
fn an_unbounded_run_is_rejected_at_load_time() {
    let path = write_config(
        "unbounded",
        r#"
        redis:
          addrs: ["127.0.0.1:6379"]
        benchmark:
          total: 0
        "#,
    );
    let cli = Cli::parse_from(["surge", "-f", path.to_str().unwrap()]);
    let err = config::load(&cli).unwrap_err();
    assert!(matches!(err, common_types::SurgeError::ConfigInvalid(_)));
    drop(std::fs::remove_file(path));
}
