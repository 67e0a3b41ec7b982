use chartfeed::{AppResult, cli::Cli, config::Config, init_logging};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    // Load configuration before logging so the log sink location applies
    let config = Config::load_or_default(&cli.config_file);

    let _guard = init_logging(&cli.effective_log_level(), &config.log)?;

    tracing::info!("chartfeed starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    chartfeed::cli::run(&cli, config).await?;

    Ok(())
}
