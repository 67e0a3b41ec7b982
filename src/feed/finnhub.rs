//! Finnhub streaming protocol: per-symbol subscriptions, batched trade
//! pushes, and a ping-based keep-alive discipline

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::candles::Tick;

use super::{CloseKind, FeedError, Heartbeat, Inbound, ProviderProtocol, default_classify_close};

/// Interval for the self-initiated keep-alive ping
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// 1008, sent when the server rejects the token as a policy violation
const CLOSE_POLICY_VIOLATION: u16 = 1008;

const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// Subscription control frame; one frame per symbol
#[derive(Debug, Serialize)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub symbol: String,
}

impl ControlFrame {
    fn new(kind: &str, symbol: &str) -> Self {
        Self {
            kind: kind.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// One trade inside a `"type":"trade"` batch; timestamps arrive already in
/// milliseconds
#[derive(Debug, Deserialize)]
pub struct TradeEntry {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "t")]
    pub ts_ms: u64,
    #[serde(rename = "v", default)]
    pub volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct TradeBatch {
    #[serde(default)]
    pub data: Vec<TradeEntry>,
}

/// Finnhub wire protocol strategy
pub struct FinnhubProtocol {
    ws_url: String,
    token: String,
}

impl FinnhubProtocol {
    pub fn new(ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            token: token.into(),
        }
    }

    fn control_frames(&self, kind: &str, symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .filter_map(|symbol| serde_json::to_string(&ControlFrame::new(kind, symbol)).ok())
            .collect()
    }
}

impl ProviderProtocol for FinnhubProtocol {
    fn name(&self) -> &'static str {
        "finnhub"
    }

    fn connect_url(&self) -> String {
        format!("{}?token={}", self.ws_url, self.token)
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        self.control_frames("subscribe", symbols)
    }

    fn unsubscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        self.control_frames("unsubscribe", symbols)
    }

    fn decode(&self, text: &str) -> Result<Inbound, FeedError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| FeedError::Malformed(format!("invalid JSON frame: {}", e)))?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some("trade") => {
                let batch: TradeBatch = serde_json::from_value(value)
                    .map_err(|e| FeedError::Malformed(format!("bad trade batch: {}", e)))?;
                let ticks = batch
                    .data
                    .into_iter()
                    .map(|trade| Tick {
                        symbol: trade.symbol,
                        ts_ms: trade.ts_ms,
                        price: trade.price,
                        volume: trade.volume,
                    })
                    .collect();
                Ok(Inbound::Ticks(ticks))
            }
            Some("ping") => Ok(Inbound::Ping),
            Some(_) => Ok(Inbound::Ignored),
            None => Ok(Inbound::Ignored),
        }
    }

    fn ping_reply(&self) -> Option<String> {
        Some(PING_FRAME.to_string())
    }

    fn heartbeat(&self) -> Option<Heartbeat> {
        Some(Heartbeat {
            interval: HEARTBEAT_INTERVAL,
            frame: PING_FRAME.to_string(),
        })
    }

    fn classify_close(&self, code: Option<u16>, reason: &str) -> CloseKind {
        if code == Some(CLOSE_POLICY_VIOLATION) {
            return CloseKind::Authentication;
        }
        default_classify_close(code, reason)
    }
}
