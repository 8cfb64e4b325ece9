//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};
use url::Url;

use stream_trader::common::channels::{create_stream_channel, StreamReceiver, StreamSender};
use stream_trader::venue::messages::{
    BuyReceipt, ContractParameters, OpenContract, Proposal, SellReceipt,
};
use stream_trader::{ClientError, ConnectionSettings, ExecutionVenue, Result, StreamKey, Tick, VenueError};

/// How long helpers wait for an expected frame before failing the test
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport settings scaled down for tests
pub fn fast_settings() -> ConnectionSettings {
    ConnectionSettings {
        request_timeout: Duration::from_millis(300),
        reconnect_base_delay: Duration::from_millis(20),
        max_reconnect_attempts: 5,
        heartbeat_interval: Duration::from_secs(3600),
        resubscribe_on_reconnect: true,
    }
}

// ============================================================================
// Local venue server
// ============================================================================

enum Command {
    Send(String),
    Drop,
}

/// Websocket server on 127.0.0.1 playing the venue
///
/// Serves one client connection at a time. Frames the client sends are
/// queued for [`next_frame`](Self::next_frame); frames pushed with
/// [`send`](Self::send) go to the live connection.
pub struct MockVenue {
    pub url: Url,
    inbound: mpsc::UnboundedReceiver<Value>,
    control: mpsc::UnboundedSender<Command>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockVenue {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let control_rx = Arc::new(tokio::sync::Mutex::new(control_rx));
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(ws, inbound_tx.clone(), control_rx.clone()));
            }
        });

        Self {
            url: Url::parse(&format!("ws://{}", addr)).unwrap(),
            inbound,
            control,
            connections,
            accept_task,
        }
    }

    /// Next JSON frame received from the client
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(FRAME_TIMEOUT, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("server stopped")
    }

    /// Next client frame that is not a keep-alive
    pub async fn next_request(&mut self) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame.get("ping").is_none() {
                return frame;
            }
        }
    }

    /// True if no client frame arrives within `wait`
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.inbound.recv()).await.is_err()
    }

    pub fn send(&self, frame: Value) {
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.control.send(Command::Send(text.to_string()));
    }

    /// Drop the live connection without a close handshake
    pub fn drop_connection(&self) {
        let _ = self.control.send(Command::Drop);
    }

    /// Refuse every later connection attempt
    pub fn stop_accepting(&self) {
        self.accept_task.abort();
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    inbound: mpsc::UnboundedSender<Value>,
    control: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>>,
) {
    let mut control = control.lock().await;
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        let _ = inbound.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            command = control.recv() => match command {
                Some(Command::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Drop) | None => break,
            },
        }
    }
}

/// Reply frame answering `request`
pub fn reply(request: &Value, msg_type: &str, payload: Value) -> Value {
    let mut frame = serde_json::json!({
        "msg_type": msg_type,
        "req_id": request["req_id"],
        "echo_req": request,
    });
    frame[msg_type] = payload;
    frame
}

/// Error reply answering `request`
pub fn error_reply(request: &Value, msg_type: &str, code: &str, message: &str) -> Value {
    serde_json::json!({
        "msg_type": msg_type,
        "req_id": request["req_id"],
        "echo_req": request,
        "error": {"code": code, "message": message},
    })
}

/// Sample venue frames
pub mod ws_messages {
    /// Tick for R_100 belonging to stream `sub-r100`
    pub const TICK_R100: &str = r#"{
        "msg_type": "tick",
        "echo_req": {"ticks": "R_100", "subscribe": 1},
        "subscription": {"id": "sub-r100"},
        "tick": {
            "ask": 1234.58, "bid": 1234.56, "epoch": 1704067200,
            "id": "sub-r100", "pip_size": 2, "quote": 1234.57, "symbol": "R_100"
        }
    }"#;

    /// Push frame with an unknown discriminant
    pub const WEBSITE_STATUS: &str = r#"{
        "msg_type": "website_status",
        "website_status": {"site_status": "up"}
    }"#;
}

// ============================================================================
// Scripted execution venue
// ============================================================================

/// In-memory [`ExecutionVenue`] replaying scripted settlements
///
/// Each bought contract settles at the next scripted sell price (zero, a
/// loss, once the script runs out).
#[derive(Default)]
pub struct ScriptedVenue {
    sell_prices: Mutex<VecDeque<Decimal>>,
    buy_failures: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    next_contract: AtomicU64,
    tick_script: Vec<Tick>,
    tick_senders: Mutex<Vec<StreamSender<Tick>>>,
    pub proposals: AtomicUsize,
    pub buys: AtomicUsize,
    pub sells: AtomicUsize,
    pub params: Mutex<Vec<ContractParameters>>,
    pub released: Mutex<Vec<StreamKey>>,
}

impl ScriptedVenue {
    pub fn new(sell_prices: impl IntoIterator<Item = Decimal>) -> Self {
        Self {
            sell_prices: Mutex::new(sell_prices.into_iter().collect()),
            next_contract: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    /// Fail the first `count` buys with a stale-proposal venue error
    pub fn with_buy_failures(self, count: usize) -> Self {
        self.buy_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make every proposal wait for a permit from `gate`
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Ticks replayed to every tick stream
    pub fn with_ticks(mut self, quotes: &[Decimal]) -> Self {
        self.tick_script = quotes
            .iter()
            .enumerate()
            .map(|(i, quote)| Tick {
                symbol: "R_100".to_string(),
                epoch: 1_704_067_200 + i as i64,
                quote: *quote,
                bid: None,
                ask: None,
                pip_size: Some(2),
            })
            .collect();
        self
    }

    pub fn stakes(&self) -> Vec<Decimal> {
        self.params.lock().iter().map(|p| p.amount).collect()
    }

    pub fn contract_types(&self) -> Vec<String> {
        self.params.lock().iter().map(|p| p.contract_type.clone()).collect()
    }

    pub fn proposal_count(&self) -> usize {
        self.proposals.load(Ordering::SeqCst)
    }

    pub fn buy_count(&self) -> usize {
        self.buys.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionVenue for ScriptedVenue {
    async fn proposal(&self, params: &ContractParameters) -> Result<Proposal> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ClientError::Internal(e.to_string()))?
                .forget();
        }
        let n = self.proposals.fetch_add(1, Ordering::SeqCst);
        self.params.lock().push(params.clone());
        Ok(Proposal {
            id: format!("proposal-{}", n),
            ask_price: params.amount,
            payout: params.amount * dec!(1.95),
            spot: None,
            spot_time: None,
            longcode: None,
        })
    }

    async fn buy(&self, _proposal_id: &str, price: Decimal) -> Result<BuyReceipt> {
        self.buys.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .buy_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VenueError::new("InvalidContractProposal", "Price has changed.").into());
        }
        Ok(BuyReceipt {
            contract_id: self.next_contract.fetch_add(1, Ordering::SeqCst),
            buy_price: price,
            balance_after: None,
            payout: None,
            transaction_id: None,
            start_time: None,
            longcode: None,
        })
    }

    async fn sell(&self, contract_id: u64, _price: Decimal) -> Result<SellReceipt> {
        self.sells.fetch_add(1, Ordering::SeqCst);
        Ok(SellReceipt {
            contract_id,
            sold_for: Decimal::ZERO,
            balance_after: None,
            transaction_id: None,
        })
    }

    fn watch_contract(&self, contract_id: u64) -> Result<StreamReceiver<OpenContract>> {
        let sell_price = self.sell_prices.lock().pop_front().unwrap_or(Decimal::ZERO);
        let (tx, rx) = create_stream_channel();
        let _ = tx.send(Ok(open_contract(contract_id, None)));
        let _ = tx.send(Ok(open_contract(contract_id, Some(sell_price))));
        Ok(rx)
    }

    async fn contract_status(&self, _contract_id: u64) -> Result<OpenContract> {
        Err(ClientError::Disconnected)
    }

    fn watch_ticks(&self, _symbol: &str) -> Result<StreamReceiver<Tick>> {
        let (tx, rx) = create_stream_channel();
        for tick in &self.tick_script {
            let _ = tx.send(Ok(tick.clone()));
        }
        self.tick_senders.lock().push(tx);
        Ok(rx)
    }

    fn release(&self, key: &StreamKey) -> Result<()> {
        self.released.lock().push(key.clone());
        Ok(())
    }
}

/// Contract snapshot; `Some(price)` marks it sold at that price
pub fn open_contract(contract_id: u64, sell_price: Option<Decimal>) -> OpenContract {
    OpenContract {
        contract_id,
        contract_type: Some("CALL".to_string()),
        underlying: Some("R_100".to_string()),
        status: Some(if sell_price.is_some() { "sold" } else { "open" }.to_string()),
        buy_price: None,
        sell_price,
        payout: None,
        profit: None,
        current_spot: None,
        entry_spot: None,
        is_sold: sell_price.is_some(),
        is_expired: sell_price.is_some(),
    }
}
