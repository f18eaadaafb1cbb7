#![forbid(unsafe_code)]

use clap::Parser;
use headgate_lib::{build_pipeline, load_from_path, run, UpstreamHandler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Shared-secret gateway that injects the client bootstrap into root documents"
)]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "headgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match load_from_path(&cli.config) {
        Ok(cfg) => {
            init_tracing(&cfg.logging.level, cfg.logging.show_target);
            info!(?cfg.listen, upstream = %cfg.upstream, "configuration loaded");

            let upstream = Arc::new(UpstreamHandler::new(
                cfg.upstream.clone(),
                Duration::from_millis(cfg.timeout.connect_ms),
            ));
            let pipeline = build_pipeline(upstream, &cfg);

            if let Err(err) = run(Arc::new(cfg), pipeline).await {
                error!(%err, "gateway exited with error");
                std::process::exit(1);
            }
        }
        Err(err) => {
            init_tracing("info", false);
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    }
}

fn init_tracing(level: &str, show_target: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(show_target)
        .init();
}
