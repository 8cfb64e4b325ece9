//! Channel type definitions for inter-task communication

use tokio::sync::{broadcast, mpsc};

use super::errors::Result;
use super::types::ConnectionStatus;

/// Default buffer for connection status broadcasts
pub const DEFAULT_STATUS_CHANNEL_SIZE: usize = 64;

/// Receiving half of a decoded venue stream
///
/// Unbounded so that delivering a frame never waits on a slow consumer.
pub type StreamReceiver<T> = mpsc::UnboundedReceiver<Result<T>>;

/// Sending half of a decoded venue stream
pub type StreamSender<T> = mpsc::UnboundedSender<Result<T>>;

/// Create a channel for one decoded stream
pub fn create_stream_channel<T>() -> (StreamSender<T>, StreamReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Create the connection status broadcast with the default buffer size
pub fn create_status_channel() -> broadcast::Sender<ConnectionStatus> {
    create_status_channel_with_size(DEFAULT_STATUS_CHANNEL_SIZE)
}

/// Create the connection status broadcast with a custom buffer size
pub fn create_status_channel_with_size(size: usize) -> broadcast::Sender<ConnectionStatus> {
    let (tx, _rx) = broadcast::channel(size);
    tx
}
