use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = skill_feedback_cli::Cli::parse();

    // RUST_LOG wins over --log-level. Logs go to stderr so stdout stays JSON.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    skill_feedback_cli::run_cli(cli)
}
