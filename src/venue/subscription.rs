//! Stream routing for venue push frames
//!
//! Every durable stream is keyed by a [`StreamKey`]: the kind of stream plus
//! an optional selector (symbol, contract type or contract id) carried inside
//! the payload. Several proposal or contract streams can be live at once and
//! are told apart by that selector, never by the transport-level `req_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::messages::InboundFrame;

/// Callback invoked for every frame routed to a stream
///
/// Listeners run on the socket's read path and must not block.
pub type Listener = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

/// Kind of durable stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Ticks,
    Candles,
    Balance,
    Portfolio,
    Proposal,
    OpenContract,
}

impl StreamKind {
    /// Resolve the stream kind from an inbound `msg_type`
    pub fn from_msg_type(msg_type: &str) -> Option<Self> {
        match msg_type {
            "tick" | "ticks" => Some(StreamKind::Ticks),
            "ohlc" | "candles" | "ticks_history" => Some(StreamKind::Candles),
            "balance" => Some(StreamKind::Balance),
            "portfolio" => Some(StreamKind::Portfolio),
            "proposal" => Some(StreamKind::Proposal),
            "proposal_open_contract" => Some(StreamKind::OpenContract),
            _ => None,
        }
    }

    /// Stream name the venue expects in `forget_all`
    pub fn forget_all_name(&self) -> &'static str {
        match self {
            StreamKind::Ticks => "ticks",
            StreamKind::Candles => "candles",
            StreamKind::Balance => "balance",
            StreamKind::Portfolio => "portfolio",
            StreamKind::Proposal => "proposal",
            StreamKind::OpenContract => "proposal_open_contract",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.forget_all_name())
    }
}

/// Logical stream identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub kind: StreamKind,
    pub selector: Option<String>,
}

impl StreamKey {
    pub fn new(kind: StreamKind, selector: Option<String>) -> Self {
        Self { kind, selector }
    }

    pub fn ticks(symbol: impl Into<String>) -> Self {
        Self::new(StreamKind::Ticks, Some(symbol.into()))
    }

    pub fn candles(symbol: impl Into<String>) -> Self {
        Self::new(StreamKind::Candles, Some(symbol.into()))
    }

    pub fn balance() -> Self {
        Self::new(StreamKind::Balance, None)
    }

    pub fn portfolio() -> Self {
        Self::new(StreamKind::Portfolio, None)
    }

    pub fn proposal(contract_type: impl Into<String>) -> Self {
        Self::new(StreamKind::Proposal, Some(contract_type.into()))
    }

    pub fn open_contract(contract_id: u64) -> Self {
        Self::new(StreamKind::OpenContract, Some(contract_id.to_string()))
    }

    /// Derive the key from a frame's discriminant and payload
    pub fn from_frame(frame: &InboundFrame) -> Option<Self> {
        let kind = StreamKind::from_msg_type(&frame.msg_type)?;
        let selector = match kind {
            StreamKind::Ticks => frame
                .field("tick")
                .and_then(|tick| tick.get("symbol"))
                .and_then(scalar)
                .or_else(|| frame.echo_str("ticks")),
            StreamKind::Candles => frame
                .field("ohlc")
                .and_then(|ohlc| ohlc.get("symbol"))
                .and_then(scalar)
                .or_else(|| frame.echo_str("ticks_history")),
            StreamKind::Balance | StreamKind::Portfolio => None,
            StreamKind::Proposal => frame.echo_str("contract_type"),
            StreamKind::OpenContract => frame
                .field("proposal_open_contract")
                .and_then(|contract| contract.get("contract_id"))
                .and_then(scalar)
                .or_else(|| frame.echo_str("contract_id")),
        };
        Some(Self { kind, selector })
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{}:{}", self.kind, selector),
            None => write!(f, "{}", self.kind),
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Routing decision for one inbound frame
pub enum Route {
    /// Deliver to these listeners
    Deliver {
        key: StreamKey,
        listeners: Vec<Listener>,
    },
    /// Frame belongs to a stream unsubscribed before its id was known
    Forget(String),
    /// No local stream matches
    Unrouted,
}

struct StreamEntry {
    /// Subscribe frame without `req_id`, replayed after a reconnect
    frame: Value,
    listeners: Vec<Listener>,
    venue_ids: Vec<String>,
    req_ids: Vec<u64>,
}

/// Registry of active streams and their listeners
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<StreamKey, StreamEntry>,
    by_req: HashMap<u64, StreamKey>,
    orphans: HashSet<u64>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener; returns true when the key is new and its frame must be sent
    pub fn register(&mut self, key: StreamKey, frame: Value, listener: Listener) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.listeners.push(listener);
                false
            }
            None => {
                self.entries.insert(
                    key,
                    StreamEntry {
                        frame,
                        listeners: vec![listener],
                        venue_ids: Vec::new(),
                        req_ids: Vec::new(),
                    },
                );
                true
            }
        }
    }

    /// Remember which request opened a stream so its replies route back to it
    pub fn bind_request(&mut self, req_id: u64, key: &StreamKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.req_ids.push(req_id);
            self.by_req.insert(req_id, key.clone());
        }
    }

    /// Route a frame to its stream
    ///
    /// A frame carrying an error ends the venue-side stream, so its entry is
    /// removed after the listeners are handed back.
    pub fn route(&mut self, frame: &InboundFrame) -> Route {
        if let Some(req_id) = frame.req_id {
            if self.orphans.contains(&req_id) {
                if let Some(id) = frame.subscription_id() {
                    self.orphans.remove(&req_id);
                    return Route::Forget(id.to_string());
                }
                if frame.error.is_some() {
                    self.orphans.remove(&req_id);
                }
                return Route::Unrouted;
            }
        }

        let key = frame
            .req_id
            .and_then(|req_id| self.by_req.get(&req_id).cloned())
            .or_else(|| StreamKey::from_frame(frame));
        let Some(key) = key else {
            return Route::Unrouted;
        };
        let Some(entry) = self.entries.get_mut(&key) else {
            return Route::Unrouted;
        };

        if let Some(id) = frame.subscription_id() {
            if !entry.venue_ids.iter().any(|known| known == id) {
                entry.venue_ids.push(id.to_string());
            }
        }
        let listeners = entry.listeners.clone();

        if frame.error.is_some() {
            self.discard(&key);
        }
        Route::Deliver { key, listeners }
    }

    fn discard(&mut self, key: &StreamKey) {
        if let Some(entry) = self.entries.remove(key) {
            for req_id in &entry.req_ids {
                self.by_req.remove(req_id);
            }
        }
    }

    /// Drop a stream; returns the venue ids that must be forgotten
    pub fn remove(&mut self, key: &StreamKey) -> Option<Vec<String>> {
        let entry = self.entries.remove(key)?;
        for req_id in &entry.req_ids {
            self.by_req.remove(req_id);
            if entry.venue_ids.is_empty() {
                self.orphans.insert(*req_id);
            }
        }
        Some(entry.venue_ids)
    }

    /// Drop every stream of one kind; returns the removed keys
    pub fn remove_kind(&mut self, kind: StreamKind) -> Vec<StreamKey> {
        let keys: Vec<StreamKey> = self
            .entries
            .keys()
            .filter(|key| key.kind == kind)
            .cloned()
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys
    }

    /// Drop everything; listeners are released so their channels close
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.by_req.clear();
        self.orphans.clear();
        count
    }

    /// Forget stale venue ids and hand back every frame to re-issue
    pub fn prepare_resubscribe(&mut self) -> Vec<(StreamKey, Value)> {
        self.by_req.clear();
        self.orphans.clear();
        self.entries
            .iter_mut()
            .map(|(key, entry)| {
                entry.venue_ids.clear();
                entry.req_ids.clear();
                (key.clone(), entry.frame.clone())
            })
            .collect()
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn listener_count(&self, key: &StreamKey) -> usize {
        self.entries
            .get(key)
            .map(|entry| entry.listeners.len())
            .unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<StreamKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
