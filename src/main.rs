// Entry point: resolve configuration, build the logger, launch the metrics
// listener in the background, then serve status requests on the main task.

use ok_server::config::{self, OkConfig};
use ok_server::metrics::{self, MetricsServer};
use ok_server::status::{Identity, StatusRecord, StatusServer};
use ok_server::{VERSION, logger};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match OkConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logger::init(&config) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::debug!(
        server_address = %config.server_address(),
        metrics_address = %config.metrics_address(),
        log_level = ?config.log_level,
        log_format = ?config.log_format,
        "Configuration resolved"
    );

    metrics::init(VERSION);

    // Not awaited: the status listener starts whether or not this bind succeeds.
    let metrics_ip = config.metrics_ip.clone();
    let metrics_port = config.metrics_port.clone();
    tokio::spawn(async move {
        if let Err(e) = MetricsServer::start(&metrics_ip, &metrics_port).await {
            tracing::error!(error = %format!("{:#}", e), "Error Starting Ok Metrics Server");
            std::process::exit(1);
        }
    });

    let identity = Identity::from_env(config::process_env);
    let record = Arc::new(StatusRecord::new(VERSION, identity));

    if let Err(e) = StatusServer::start(&config.server_ip, &config.server_port, record).await {
        tracing::error!(error = %format!("{:#}", e), "Could not start Ok server");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
