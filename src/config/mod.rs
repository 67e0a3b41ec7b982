//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;

use crate::candles::Timeframe;
use crate::feed::ReconnectConfig;

/// Streaming provider selected by the composition root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Twelvedata,
    Finnhub,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twelvedata" => Ok(ProviderKind::Twelvedata),
            "finnhub" => Ok(ProviderKind::Finnhub),
            other => Err(format!(
                "unknown provider '{}', expected 'twelvedata' or 'finnhub'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Symbols to watch
    pub symbols: Vec<String>,

    /// Active streaming provider
    pub provider: ProviderKind,

    /// Candle timeframe for aggregation
    pub timeframe: Timeframe,

    /// Logging level
    pub log_level: String,

    /// File-based logging configuration
    pub log: LogConfig,

    /// Twelve Data endpoint and credentials
    pub twelvedata: ProviderEndpoint,

    /// Finnhub endpoint and credentials
    pub finnhub: ProviderEndpoint,

    /// Backoff and cooldown policy shared by both clients
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEndpoint {
    /// WebSocket base URL
    pub ws_url: String,

    /// API token appended to the connect URL
    pub api_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Absolute or relative path to the rolling log file
    pub file_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string()],
            provider: ProviderKind::Finnhub,
            timeframe: Timeframe::Hour,
            log_level: "info".to_string(),
            log: LogConfig::default(),
            twelvedata: ProviderEndpoint {
                ws_url: "wss://ws.twelvedata.com/v1/quotes/price".to_string(),
                api_token: String::new(),
            },
            finnhub: ProviderEndpoint {
                ws_url: "wss://ws.finnhub.io".to_string(),
                api_token: String::new(),
            },
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_path: "logs/chartfeed.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // CHARTFEED_SYMBOLS - comma-separated list of symbols
        if let Ok(symbols) = env::var("CHARTFEED_SYMBOLS") {
            self.symbols = symbols
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // CHARTFEED_PROVIDER - active streaming provider
        if let Ok(provider) = env::var("CHARTFEED_PROVIDER") {
            if let Ok(value) = provider.parse() {
                self.provider = value;
            }
        }

        // CHARTFEED_TIMEFRAME - candle timeframe
        if let Ok(timeframe) = env::var("CHARTFEED_TIMEFRAME") {
            if let Ok(value) = timeframe.parse() {
                self.timeframe = value;
            }
        }

        // CHARTFEED_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("CHARTFEED_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // CHARTFEED_LOG_FILE_PATH - logging destination file
        if let Ok(file_path) = env::var("CHARTFEED_LOG_FILE_PATH") {
            if !file_path.trim().is_empty() {
                self.log.file_path = file_path;
            }
        }

        // CHARTFEED_TWELVEDATA_API_TOKEN / CHARTFEED_FINNHUB_API_TOKEN
        if let Ok(token) = env::var("CHARTFEED_TWELVEDATA_API_TOKEN") {
            self.twelvedata.api_token = token;
        }
        if let Ok(token) = env::var("CHARTFEED_FINNHUB_API_TOKEN") {
            self.finnhub.api_token = token;
        }

        // CHARTFEED_TWELVEDATA_WS_URL / CHARTFEED_FINNHUB_WS_URL
        if let Ok(ws_url) = env::var("CHARTFEED_TWELVEDATA_WS_URL") {
            self.twelvedata.ws_url = ws_url;
        }
        if let Ok(ws_url) = env::var("CHARTFEED_FINNHUB_WS_URL") {
            self.finnhub.ws_url = ws_url;
        }

        // CHARTFEED_RECONNECT_BASE_DELAY_MS - first retry delay
        if let Ok(delay) = env::var("CHARTFEED_RECONNECT_BASE_DELAY_MS") {
            if let Ok(value) = delay.parse::<u64>() {
                self.reconnect.base_delay_ms = value;
            }
        }

        // CHARTFEED_RECONNECT_MAX_ATTEMPTS - retry cap
        if let Ok(attempts) = env::var("CHARTFEED_RECONNECT_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                self.reconnect.max_attempts = value;
            }
        }

        // CHARTFEED_RECONNECT_COOLDOWN_SECS - rate-limit cooldown window
        if let Ok(cooldown) = env::var("CHARTFEED_RECONNECT_COOLDOWN_SECS") {
            if let Ok(value) = cooldown.parse::<u64>() {
                self.reconnect.rate_limit_cooldown_secs = value;
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// The endpoint for the currently selected provider
    pub fn active_endpoint(&self) -> &ProviderEndpoint {
        match self.provider {
            ProviderKind::Twelvedata => &self.twelvedata,
            ProviderKind::Finnhub => &self.finnhub,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            anyhow::bail!("At least one symbol must be specified");
        }

        for symbol in &self.symbols {
            if symbol.is_empty() {
                anyhow::bail!("Symbols must not be empty strings");
            }
        }

        if self.log.file_path.trim().is_empty() {
            anyhow::bail!("Log file path must not be empty");
        }

        if self.twelvedata.ws_url.trim().is_empty() || self.finnhub.ws_url.trim().is_empty() {
            anyhow::bail!("Provider WebSocket URLs must not be empty");
        }

        if self.reconnect.base_delay_ms == 0 {
            anyhow::bail!("reconnect.base_delay_ms must be greater than 0");
        }

        if self.reconnect.rate_limit_cooldown_secs == 0 {
            anyhow::bail!("reconnect.rate_limit_cooldown_secs must be greater than 0");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{:#?}", self);
        Ok(())
    }
}
