//! Venue module - streaming client for the trading venue's websocket API

pub mod connection;
pub mod gateway;
pub mod messages;
pub mod subscription;

pub use connection::{ConnectionSettings, VenueConnection};
pub use gateway::VenueGateway;
pub use subscription::{StreamKey, StreamKind};
