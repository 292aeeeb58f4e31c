//! keiba-pipeline command-line entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keiba_pipeline::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keiba_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run(cli)
}
