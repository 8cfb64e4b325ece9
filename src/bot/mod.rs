//! Bot module - autonomous trading loop on top of the venue gateway
//!
//! This module provides:
//! - `TradeConfig` describing one run
//! - `StakingStrategy` sizing rules
//! - `TradeProgram` trade-intent directives with indicator predicates
//! - `BotEngine` / `BotRun` driving the buy → settle → re-stake loop
//! - `BotSession` enforcing one active run per session

pub mod config;
pub mod engine;
pub mod indicators;
pub mod intent;
pub mod session;
pub mod staking;
pub mod stats;
pub mod traits;

pub use config::{ContractKind, DurationUnit, TradeConfig};
pub use engine::{BotEngine, BotRun, EngineSettings};
pub use indicators::{MarketData, TickHistory};
pub use intent::{Comparison, CrossDirection, Predicate, Statement, TradeProgram};
pub use session::BotSession;
pub use staking::{StakeDecision, StakingStrategy};
pub use stats::{RunStats, TradeHistory};
pub use traits::ExecutionVenue;
