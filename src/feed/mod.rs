//! Streaming price feed: provider protocols, connection state machine,
//! subscription routing, and reconnect policy

use std::time::Duration;

use crate::candles::Tick;

pub mod retry;
pub mod router;
pub mod socket;

pub mod finnhub;
pub mod twelvedata;

pub use retry::{ReconnectConfig, ScheduledTask};
pub use router::{HandlerToken, TickRouter};
pub use socket::FeedClient;

/// Connection lifecycle state, mutated only by lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    RateLimited,
    Closed,
}

/// Stable machine-readable error axis, independent of message wording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    RateLimited,
    Authentication,
    Malformed,
    Exhausted,
}

/// Error surface delivered to feed error callbacks.
///
/// Every variant carries a human-readable message; `category()` is the axis
/// callers should branch on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("rate limited, about {} minute(s) of cooldown remaining", .remaining_secs.div_ceil(60))]
    RateLimited { remaining_secs: u64 },
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("malformed message dropped: {0}")]
    Malformed(String),
    #[error("gave up after {attempts} reconnect attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl FeedError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FeedError::Connection(_) => ErrorCategory::Transient,
            FeedError::RateLimited { .. } => ErrorCategory::RateLimited,
            FeedError::Authentication(_) => ErrorCategory::Authentication,
            FeedError::Malformed(_) => ErrorCategory::Malformed,
            FeedError::RetriesExhausted { .. } => ErrorCategory::Exhausted,
        }
    }
}

/// Diagnosis of a transport close event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Intentional or normal close, no recovery
    Clean,
    /// Provider shed us for exceeding its request budget
    RateLimited,
    /// Token rejected; retrying would only repeat the failure
    Authentication,
    /// Anything else: network drop, server restart, idle timeout
    Abnormal,
}

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Price observations ready for dispatch
    Ticks(Vec<Tick>),
    /// Keep-alive probe that must be answered
    Ping,
    /// Subscription acknowledgement or other control frame
    Ack,
    /// Well-formed but irrelevant to us
    Ignored,
}

/// Client-initiated keep-alive requirement of a provider
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub interval: Duration,
    pub frame: String,
}

/// Wire-protocol strategy for one streaming provider.
///
/// The generic [`FeedClient`] owns the connection lifecycle; implementations
/// of this trait supply only the provider-specific pieces: URL and token
/// placement, subscription framing, frame decoding, keep-alive discipline,
/// and close-reason diagnosis.
pub trait ProviderProtocol: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Full connect URL including the token query parameter
    fn connect_url(&self) -> String;

    /// Frames to send when subscribing to the given symbols
    fn subscribe_frames(&self, symbols: &[String]) -> Vec<String>;

    /// Frames to send when unsubscribing from the given symbols
    fn unsubscribe_frames(&self, symbols: &[String]) -> Vec<String>;

    /// Decode one text frame
    fn decode(&self, text: &str) -> Result<Inbound, FeedError>;

    /// Reply to an application-level [`Inbound::Ping`], if the provider
    /// expects one
    fn ping_reply(&self) -> Option<String> {
        None
    }

    /// Client-initiated heartbeat, for providers that drop silent peers
    fn heartbeat(&self) -> Option<Heartbeat> {
        None
    }

    /// Diagnose a transport close event
    fn classify_close(&self, code: Option<u16>, reason: &str) -> CloseKind {
        default_classify_close(code, reason)
    }
}

/// Normal/going-away close codes per RFC 6455
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;

/// Shared close diagnosis: clean codes, then HTTP status markers smuggled
/// into the reason string by the provider's proxy layer
pub fn default_classify_close(code: Option<u16>, reason: &str) -> CloseKind {
    if matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY)) {
        return CloseKind::Clean;
    }
    if reason.contains("429") {
        return CloseKind::RateLimited;
    }
    if reason.contains("403") || reason.contains("401") {
        return CloseKind::Authentication;
    }
    CloseKind::Abnormal
}
