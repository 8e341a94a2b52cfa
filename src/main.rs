//! # Discovery Server - Entry Point
//! src/main.rs

use clap::Parser;
use discovery_server::config::Config;
use discovery_server::server::Server;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = Config::parse();

    // RUST_LOG tiene prioridad sobre --debug
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(2);
    }
    config.log_summary();

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to initialize job service");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        error!(error = %e, "Fatal server error");
        std::process::exit(1);
    }
}
