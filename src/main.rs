//! Crawler entry point
//!
//! `crawler [DOMAIN ...]`: crawl the configured frontier, optionally
//! restricted to the given registrable domains. Exits 0 on normal
//! completion even when individual domains failed, 1 when the frontier is
//! empty, and non-zero when the configuration is missing or malformed.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

use crawler::crawl::supervisor::SupervisorError;
use crawler::{logging, Config, Supervisor};

#[derive(Parser)]
#[command(name = "crawler")]
#[command(about = "Polite, script-driven web crawler")]
#[command(version)]
struct Cli {
    /// Domains to crawl; empty means all configured domains
    domains: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(" cache dir: {}", config.cache_dir.display());
    info!("  data dir: {}", config.data_dir.display());
    info!("script dir: {}", config.script_dir.display());
    info!("   pem dir: {}", config.pem_dir.display());

    if cli.domains.is_empty() {
        info!("crawler starting for all configured domains ...");
    } else {
        info!("crawling only these domains:");
        for domain in &cli.domains {
            info!("  - {}", domain.to_lowercase());
        }
    }

    let supervisor = Supervisor::new(config, &cli.domains);
    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ SupervisorError::FrontierEmpty(_)) => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
