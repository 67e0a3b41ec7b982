//! Twelve Data streaming protocol: comma-joined batch subscriptions and
//! second-resolution price events, no client keep-alive

use serde::{Deserialize, Serialize};

use crate::candles::Tick;

use super::{FeedError, Inbound, ProviderProtocol};

/// Batch subscription frame; symbols ride comma-joined in a single message
#[derive(Debug, Serialize)]
pub struct ActionFrame {
    pub action: String,
    pub symbols: String,
}

impl ActionFrame {
    fn new(action: &str, symbols: &[String]) -> Self {
        Self {
            action: action.to_string(),
            symbols: symbols.join(","),
        }
    }
}

/// Inbound price event. Timestamps are in epoch seconds; OHLC and volume
/// fields appear only on instruments that publish them.
#[derive(Debug, Deserialize)]
pub struct PriceEvent {
    pub symbol: String,
    pub timestamp: u64,
    pub price: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
}

/// Twelve Data wire protocol strategy
pub struct TwelveDataProtocol {
    ws_url: String,
    api_token: String,
}

impl TwelveDataProtocol {
    pub fn new(ws_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_token: api_token.into(),
        }
    }

    fn action_frames(&self, action: &str, symbols: &[String]) -> Vec<String> {
        if symbols.is_empty() {
            return Vec::new();
        }
        serde_json::to_string(&ActionFrame::new(action, symbols))
            .map(|frame| vec![frame])
            .unwrap_or_default()
    }
}

impl ProviderProtocol for TwelveDataProtocol {
    fn name(&self) -> &'static str {
        "twelvedata"
    }

    fn connect_url(&self) -> String {
        format!("{}?apikey={}", self.ws_url, self.api_token)
    }

    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        self.action_frames("subscribe", symbols)
    }

    fn unsubscribe_frames(&self, symbols: &[String]) -> Vec<String> {
        self.action_frames("unsubscribe", symbols)
    }

    fn decode(&self, text: &str) -> Result<Inbound, FeedError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| FeedError::Malformed(format!("invalid JSON frame: {}", e)))?;

        match value.get("event").and_then(|e| e.as_str()) {
            Some("price") => {
                let event: PriceEvent = serde_json::from_value(value)
                    .map_err(|e| FeedError::Malformed(format!("bad price event: {}", e)))?;
                Ok(Inbound::Ticks(vec![Tick {
                    symbol: event.symbol,
                    // Source clock is in seconds
                    ts_ms: event.timestamp * 1000,
                    price: event.price,
                    volume: event.volume,
                }]))
            }
            Some("subscribe-status") | Some("unsubscribe-status") => Ok(Inbound::Ack),
            Some("heartbeat") => Ok(Inbound::Ignored),
            _ => Ok(Inbound::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol() -> TwelveDataProtocol {
        TwelveDataProtocol::new("wss://ws.twelvedata.com/v1/quotes/price", "secret")
    }

    #[test]
    fn test_connect_url_carries_api_key() {
        assert_eq!(
            protocol().connect_url(),
            "wss://ws.twelvedata.com/v1/quotes/price?apikey=secret"
        );
    }

    #[test]
    fn test_batch_subscribe_is_a_single_comma_joined_frame() {
        let frames = protocol().subscribe_frames(&[
            "AAPL".to_string(),
            "TSLA".to_string(),
            "MSFT".to_string(),
        ]);
        assert_eq!(
            frames,
            vec![r#"{"action":"subscribe","symbols":"AAPL,TSLA,MSFT"}"#]
        );
    }

    #[test]
    fn test_no_frames_for_empty_symbol_set() {
        assert!(protocol().subscribe_frames(&[]).is_empty());
        assert!(protocol().unsubscribe_frames(&[]).is_empty());
    }

    #[test]
    fn test_unsubscribe_mirrors_subscribe() {
        let frames = protocol().unsubscribe_frames(&["AAPL".to_string()]);
        assert_eq!(frames, vec![r#"{"action":"unsubscribe","symbols":"AAPL"}"#]);
    }

    #[test]
    fn test_decode_price_event_converts_seconds_to_millis() {
        let frame = r#"{"event":"price","symbol":"AAPL","timestamp":1700000000,"price":187.21,"volume":350.0}"#;
        let Inbound::Ticks(ticks) = protocol().decode(frame).unwrap() else {
            panic!("expected ticks");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].ts_ms, 1_700_000_000_000);
        assert_eq!(ticks[0].price, 187.21);
        assert_eq!(ticks[0].volume, Some(350.0));
    }

    #[test]
    fn test_decode_price_event_without_optional_fields() {
        let frame = r#"{"event":"price","symbol":"EUR/USD","timestamp":1700000000,"price":1.0712}"#;
        let Inbound::Ticks(ticks) = protocol().decode(frame).unwrap() else {
            panic!("expected ticks");
        };
        assert_eq!(ticks[0].volume, None);
    }

    #[test]
    fn test_decode_subscribe_status_is_ack() {
        let frame = r#"{"event":"subscribe-status","status":"ok","success":[{"symbol":"AAPL"}]}"#;
        assert_eq!(protocol().decode(frame).unwrap(), Inbound::Ack);
    }

    #[test]
    fn test_decode_server_heartbeat_needs_no_reply() {
        let frame = r#"{"event":"heartbeat","status":"ok"}"#;
        assert_eq!(protocol().decode(frame).unwrap(), Inbound::Ignored);
        assert!(protocol().heartbeat().is_none());
        assert!(protocol().ping_reply().is_none());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = protocol().decode("not json at all").unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }

    #[test]
    fn test_decode_price_event_with_missing_price_is_malformed() {
        let frame = r#"{"event":"price","symbol":"AAPL","timestamp":1700000000}"#;
        let err = protocol().decode(frame).unwrap_err();
        assert!(matches!(err, FeedError::Malformed(_)));
    }
}
