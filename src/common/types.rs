//! Shared types used by the transport, the gateway and the bot engine

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of the single venue connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// Connection status change, broadcast to every observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Successfully connected (initially or after a reconnect)
    Connected,
    /// Waiting `delay_ms` before reconnect attempt number `attempt`
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Streams re-issued after a reconnect
    Resubscribed { streams: usize },
    /// Streams dropped after a reconnect because re-subscription is off
    SubscriptionsLost { streams: usize },
    /// Disconnected (with optional reason); terminal once the retry budget is spent
    Disconnected(Option<String>),
    /// Socket-level error that triggered a reconnect
    Error(String),
}

/// A single price tick for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument symbol, e.g. `R_100`
    pub symbol: String,
    /// Venue timestamp in unix seconds
    pub epoch: i64,
    /// Quoted price
    pub quote: Decimal,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Decimal places the venue quotes this instrument with
    #[serde(default)]
    pub pip_size: Option<u32>,
}

impl Tick {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.epoch, 0).single()
    }

    /// Last digit of the quote at the instrument's pip size
    pub fn last_digit(&self) -> Option<u8> {
        let scale = self.pip_size.unwrap_or_else(|| self.quote.scale());
        let scaled = self.quote.round_dp(scale) * Decimal::from(10u64.pow(scale));
        let digit = scaled.trunc() % Decimal::from(10);
        digit.to_string().parse().ok()
    }
}

/// OHLC candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle close time (unix seconds)
    pub epoch: i64,
    /// Candle open time, present on streamed `ohlc` updates
    #[serde(default)]
    pub open_time: Option<i64>,
    #[serde(default)]
    pub symbol: Option<String>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Settlement outcome of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Won,
    Lost,
}

impl Outcome {
    pub fn from_profit(profit: Decimal) -> Self {
        if profit > Decimal::ZERO {
            Outcome::Won
        } else {
            Outcome::Lost
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::Won => write!(f, "won"),
            Outcome::Lost => write!(f, "lost"),
        }
    }
}

/// One purchased contract, pending or settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue contract identifier
    pub contract_id: u64,
    /// Contract type as the venue names it (`CALL`, `DIGITMATCH`, ...)
    pub contract_type: String,
    pub symbol: String,
    /// Amount paid for the contract
    pub stake: Decimal,
    /// Amount received at settlement (zero while pending or on a loss)
    pub payout: Decimal,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    pub fn profit(&self) -> Decimal {
        self.payout - self.stake
    }
}

/// Lifecycle of one bot run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl BotState {
    /// True while the run still owns its loop
    pub fn is_active(&self) -> bool {
        matches!(self, BotState::Running | BotState::Paused)
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotState::Idle => write!(f, "idle"),
            BotState::Running => write!(f, "running"),
            BotState::Paused => write!(f, "paused"),
            BotState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_last_digit() {
        let tick = Tick {
            symbol: "R_100".to_string(),
            epoch: 1_704_067_200,
            quote: dec!(1234.57),
            bid: None,
            ask: None,
            pip_size: Some(2),
        };
        assert_eq!(tick.last_digit(), Some(7));

        // Trailing zero dropped by the wire encoding still counts at pip size
        let tick = Tick {
            quote: dec!(1234.5),
            ..tick
        };
        assert_eq!(tick.last_digit(), Some(0));
    }

    #[test]
    fn test_tick_deserializes_numeric_quote() {
        let json = r#"{"symbol": "R_50", "epoch": 1704067200, "quote": 251.1234, "pip_size": 4}"#;
        let tick: Tick = serde_json::from_str(json).unwrap();
        assert_eq!(tick.quote, dec!(251.1234));
        assert!(tick.time().is_some());
    }

    #[test]
    fn test_outcome_from_profit() {
        assert_eq!(Outcome::from_profit(dec!(0.95)), Outcome::Won);
        assert_eq!(Outcome::from_profit(dec!(-10)), Outcome::Lost);
        assert_eq!(Outcome::from_profit(Decimal::ZERO), Outcome::Lost);
    }

    #[test]
    fn test_bot_state_activity() {
        assert!(BotState::Running.is_active());
        assert!(BotState::Paused.is_active());
        assert!(!BotState::Stopped.is_active());
        assert!(!BotState::Idle.is_active());
    }
}
