//! Command Line Interface module
//!
//! Argument parsing and the composition root wiring provider clients to
//! chart aggregation.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::candles::Timeframe;
use crate::chart::ChartState;
use crate::config::{Config, ProviderKind};
use crate::feed::finnhub::FinnhubProtocol;
use crate::feed::twelvedata::TwelveDataProtocol;
use crate::feed::{FeedClient, ProviderProtocol};

#[derive(Parser, Debug, Clone)]
#[command(name = "chartfeed")]
#[command(about = "Streaming candle feed with historical reconciliation")]
#[command(
    long_about = "Ingests live price ticks and reconciles them with historical OHLC snapshots into chart-ready candle series"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Stream live candles for a set of symbols
    Stream {
        /// Symbols to watch; falls back to the configured list
        symbols: Vec<String>,

        /// Streaming provider (twelvedata, finnhub)
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Candle timeframe (1h, 1d, 1w, 1M, 1y)
        #[arg(long)]
        timeframe: Option<Timeframe>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Stream {
            symbols: Vec::new(),
            provider: None,
            timeframe: None,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the actual command, using default if none provided
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Adjust log level based on verbose flag
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}

/// Execute the parsed command
pub async fn run(cli: &Cli, config: Config) -> Result<()> {
    match cli.command() {
        Commands::Stream {
            symbols,
            provider,
            timeframe,
        } => run_stream(config, symbols, provider, timeframe).await,
        Commands::Config { action } => handle_config_command(&cli.config_file, &action),
    }
}

/// Apply command-line overrides, pick the provider strategy once, and
/// stream until interrupted
async fn run_stream(
    mut config: Config,
    symbols: Vec<String>,
    provider: Option<ProviderKind>,
    timeframe: Option<Timeframe>,
) -> Result<()> {
    if !symbols.is_empty() {
        config.symbols = symbols;
    }
    if let Some(kind) = provider {
        config.provider = kind;
    }
    if let Some(tf) = timeframe {
        config.timeframe = tf;
    }
    config.validate()?;

    match config.provider {
        ProviderKind::Twelvedata => {
            let endpoint = &config.twelvedata;
            let client = FeedClient::new(
                TwelveDataProtocol::new(&endpoint.ws_url, &endpoint.api_token),
                config.reconnect.clone(),
            );
            stream_until_interrupted(client, &config).await
        }
        ProviderKind::Finnhub => {
            let endpoint = &config.finnhub;
            let client = FeedClient::new(
                FinnhubProtocol::new(&endpoint.ws_url, &endpoint.api_token),
                config.reconnect.clone(),
            );
            stream_until_interrupted(client, &config).await
        }
    }
}

async fn stream_until_interrupted<P: ProviderProtocol>(
    client: FeedClient<P>,
    config: &Config,
) -> Result<()> {
    let timeframe = config.timeframe;

    client.on_connect(|| {
        println!("{}", "connected".green());
    });
    client.on_error(|err| {
        eprintln!("{} {}", "feed error:".red(), err);
    });

    for symbol in &config.symbols {
        let chart = Arc::new(Mutex::new(ChartState::new(timeframe)));
        let label = symbol.clone();
        client.on_price_update(symbol, move |tick| {
            let mut chart = chart.lock().unwrap();
            chart.on_tick(tick);
            if let Some(candle) = chart.chart_candles().last() {
                println!(
                    "{} {} o={:.4} h={:.4} l={:.4} c={:.4} v={:.2}",
                    format_period(candle.period_start_ms).dimmed(),
                    label.bold(),
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume,
                );
            }
        });
    }

    client.connect(config.symbols.clone()).await?;
    println!(
        "streaming {} at {} candles, press Ctrl-C to stop",
        config.symbols.join(", "),
        timeframe
    );

    tokio::signal::ctrl_c().await?;
    client.disconnect().await;

    let stats = client.metrics().snapshot();
    println!(
        "{} ticks ({:.1}/s), {} reconnects, {} malformed frames",
        stats.ticks_received, stats.ticks_per_second, stats.reconnects, stats.malformed_frames
    );
    Ok(())
}

fn format_period(ts_ms: u64) -> String {
    Utc.timestamp_millis_opt(ts_ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Handle the `config` subcommand
pub fn handle_config_command(config_file: &str, action: &Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Show) => {
            let config = Config::load_or_default(config_file);
            println!("Configuration from {}", config_file);
            config.display()?;
        }
        Some(ConfigAction::Reset) => {
            let config = Config::default();
            config.save_to_file(config_file)?;
            println!("Configuration reset to defaults at {}", config_file);
        }
        None => {
            println!("Configuration management commands:");
            println!("  chartfeed config show  - Show current configuration");
            println!("  chartfeed config reset - Reset to default configuration");
        }
    }
    Ok(())
}
