//! Citadel gateway entry point.

use std::path::PathBuf;

use tracing::{error, info};

use citadel_gateway::telemetry::init_logging;
use citadel_gateway::{GatewayConfig, GatewayServer};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("citadel-gateway {}", citadel_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Citadel Gateway - API gateway with a zero-trust security pipeline

USAGE:
    citadel-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    CITADEL_LISTEN_ADDR              Listen address (default: 0.0.0.0)
    CITADEL_LISTEN_PORT              Listen port (default: 8000)
    CITADEL_RATE_LIMIT_PER_SECOND    Requests per client per second (default: 5)
    CITADEL_RATE_LIMIT_PER_MINUTE    Requests per client per minute (default: 100)
    CITADEL_ENABLE_FIREWALL          Enable the request firewall (default: true)
    CITADEL_ENABLE_ZERO_TRUST        Enable the dynamic-token gate (default: true)
    CITADEL_ZERO_TRUST_HEADER        Dynamic-token header (default: X-ZTNA-Token)
    CITADEL_LOG_LEVEL                Log level when RUST_LOG is unset (default: info)
    <NAME>_SERVICE_URL               Base URL of a configured service,
                                     e.g. AUTH_SERVICE_URL, DATA_SERVICE_URL

EXAMPLES:
    # Run with configuration file
    citadel-gateway --config /etc/citadel/gateway.toml

    # Run with environment variables
    DATA_SERVICE_URL=http://localhost:8002 citadel-gateway
"
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => match GatewayConfig::from_file(path) {
            Ok(config) => config.with_env_overrides(),
            Err(e) => {
                eprintln!("Failed to load configuration from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default().with_env_overrides(),
    };

    if let Err(e) = init_logging(&config.telemetry) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!(category = e.category(), "Invalid configuration: {e}");
        std::process::exit(1);
    }

    info!(
        version = citadel_gateway::VERSION,
        config = ?args.config,
        "starting citadel gateway"
    );

    let server = match GatewayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(category = e.category(), "Failed to start gateway: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(category = e.category(), "Server error: {e}");
        std::process::exit(1);
    }
}
