//! Trait definitions for the transport and engine seams

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::errors::{ClientError, Result};
use super::types::{BotState, ConnectionStatus, Trade};
use crate::bot::stats::RunStats;
use crate::venue::messages::InboundFrame;
use crate::venue::subscription::{Listener, StreamKey, StreamKind};

/// What the gateway needs from a venue connection
///
/// Implemented by [`VenueConnection`](crate::venue::connection::VenueConnection);
/// tests substitute an in-memory fake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a one-shot request and wait for its correlated reply
    async fn request(&self, frame: Value) -> Result<InboundFrame>;

    /// Register a listener for a durable stream
    ///
    /// # Arguments
    /// * `key` - Logical stream identity used for routing
    /// * `frame` - Subscribe request, sent only if the stream is new
    /// * `listener` - Called for every frame routed to `key`; must not block
    fn subscribe(&self, key: StreamKey, frame: Value, listener: Listener) -> Result<()>;

    /// Drop a stream; calling it for an unknown key is a no-op
    fn unsubscribe(&self, key: &StreamKey) -> Result<()>;

    /// Drop every stream of one kind
    fn forget_all(&self, kind: StreamKind) -> Result<()>;

    /// Subscribe to connection status events
    fn status_events(&self) -> broadcast::Receiver<ConnectionStatus>;
}

/// Receives bot run updates, typically to re-render a UI
pub trait BotObserver: Send + Sync {
    /// Called with a fresh snapshot after every settlement
    fn on_stats_update(&self, stats: &RunStats);

    /// Called with every settled trade
    fn on_trade(&self, trade: &Trade);

    fn on_state_change(&self, _state: BotState) {}

    /// Transient error notification; the run keeps going
    fn on_error(&self, _error: &ClientError) {}
}

/// Observer that writes every update to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BotObserver for TracingObserver {
    fn on_stats_update(&self, stats: &RunStats) {
        info!(
            runs = stats.runs,
            won = stats.won,
            lost = stats.lost,
            profit = %stats.profit(),
            "Run stats updated"
        );
    }

    fn on_trade(&self, trade: &Trade) {
        info!(
            contract_id = trade.contract_id,
            stake = %trade.stake,
            payout = %trade.payout,
            outcome = %trade.outcome,
            "Trade settled"
        );
    }

    fn on_state_change(&self, state: BotState) {
        info!(%state, "Bot state changed");
    }

    fn on_error(&self, error: &ClientError) {
        warn!("Bot error: {}", error);
    }
}
