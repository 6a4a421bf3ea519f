use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mail_console::cli::{self, Cli};
use mail_console::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the transcript; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "mail_console=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    debug!(base_url = %config.base_url, signed_in = config.token.is_some(), "configuration loaded");

    cli::dispatch(cli, config).await
}
