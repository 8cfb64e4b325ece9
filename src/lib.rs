//! StreamTrader Library
//!
//! A Rust library for trading against a derivatives venue's websocket API:
//! a multiplexing transport client, a typed gateway over it, and an
//! autonomous bot engine driving buy → settle → re-stake loops.

pub mod bot;
pub mod common;
pub mod config;
pub mod venue;

// Re-export commonly used types
pub use common::errors::{ClientError, Result, VenueError};
pub use common::traits::{BotObserver, TracingObserver, Transport};
pub use common::types::{BotState, Candle, ConnectionState, ConnectionStatus, Outcome, Tick, Trade};
pub use config::types::AppConfig;
pub use venue::connection::{ConnectionSettings, VenueConnection};
pub use venue::gateway::VenueGateway;
pub use venue::subscription::{StreamKey, StreamKind};

// Bot types
pub use bot::{
    BotEngine, BotRun, BotSession, ContractKind, DurationUnit, EngineSettings, ExecutionVenue,
    RunStats, StakingStrategy, TradeConfig, TradeProgram,
};
