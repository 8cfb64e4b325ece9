//! Typed facade over the venue transport
//!
//! One method per venue operation; the engine never builds raw frames.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Number, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use super::messages::{
    AccountSummary, ActiveSymbol, Authorization, Balance, BuyReceipt, ContractParameters,
    InboundFrame, OpenContract, Portfolio, Proposal, SellReceipt, Statement,
};
use super::subscription::{Listener, StreamKey, StreamKind};
use crate::common::channels::{create_stream_channel, StreamReceiver};
use crate::common::errors::{ClientError, Result};
use crate::common::traits::Transport;
use crate::common::types::{Candle, ConnectionStatus, Tick};

/// Market and account operations
#[derive(Clone)]
pub struct VenueGateway {
    transport: Arc<dyn Transport>,
}

impl VenueGateway {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Authorize the session with an API token
    #[instrument(skip(self, token))]
    pub async fn authorize(&self, token: &str) -> Result<Authorization> {
        let reply = self.transport.request(json!({ "authorize": token })).await?;
        let authorization: Authorization = reply.into_payload("authorize")?;
        info!(loginid = %authorization.loginid, "Authorized");
        Ok(authorization)
    }

    /// Accounts available to the authorized user
    pub async fn get_accounts(&self) -> Result<Vec<AccountSummary>> {
        self.call(json!({ "account_list": 1 }), "account_list").await
    }

    /// Switch the session to another account by authorizing with its token
    #[instrument(skip(self, token))]
    pub async fn switch_account(&self, token: &str) -> Result<Authorization> {
        self.authorize(token).await
    }

    /// Instruments currently offered
    pub async fn active_symbols(&self) -> Result<Vec<ActiveSymbol>> {
        self.call(
            json!({ "active_symbols": "brief", "product_type": "basic" }),
            "active_symbols",
        )
        .await
    }

    /// One-shot price quote for a contract
    #[instrument(skip(self, params), fields(contract_type = %params.contract_type, amount = %params.amount))]
    pub async fn proposal(&self, params: &ContractParameters) -> Result<Proposal> {
        let mut frame = serde_json::to_value(params)?;
        insert(&mut frame, "proposal", json!(1))?;
        self.call(frame, "proposal").await
    }

    /// Buy a proposal at no more than `price`
    #[instrument(skip(self))]
    pub async fn buy(&self, proposal_id: &str, price: Decimal) -> Result<BuyReceipt> {
        let frame = json!({ "buy": proposal_id, "price": number(price)? });
        let receipt: BuyReceipt = self.call(frame, "buy").await?;
        debug!(contract_id = receipt.contract_id, "Bought contract");
        Ok(receipt)
    }

    /// Sell an open contract for at least `price` (zero sells at market)
    #[instrument(skip(self))]
    pub async fn sell(&self, contract_id: u64, price: Decimal) -> Result<SellReceipt> {
        self.call(json!({ "sell": contract_id, "price": number(price)? }), "sell")
            .await
    }

    /// Recent account transactions
    pub async fn statement(&self, limit: u32) -> Result<Statement> {
        self.call(
            json!({ "statement": 1, "description": 1, "limit": limit }),
            "statement",
        )
        .await
    }

    /// Current account balance
    pub async fn balance(&self) -> Result<Balance> {
        self.call(json!({ "balance": 1 }), "balance").await
    }

    /// Snapshot of one contract without opening a stream
    pub async fn contract_status(&self, contract_id: u64) -> Result<OpenContract> {
        self.call(
            json!({ "proposal_open_contract": 1, "contract_id": contract_id }),
            "proposal_open_contract",
        )
        .await
    }

    /// Start copying a trader's contracts
    #[instrument(skip(self, trader_token))]
    pub async fn copy_start(&self, trader_token: &str) -> Result<()> {
        self.transport
            .request(json!({ "copy_start": trader_token }))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, trader_token))]
    pub async fn copy_stop(&self, trader_token: &str) -> Result<()> {
        self.transport
            .request(json!({ "copy_stop": trader_token }))
            .await?;
        Ok(())
    }

    /// Round-trip check; returns the venue's answer (`pong`)
    pub async fn ping(&self) -> Result<String> {
        self.call(json!({ "ping": 1 }), "ping").await
    }

    /// Stream ticks for `symbol`
    pub fn subscribe_ticks(&self, symbol: &str) -> Result<StreamReceiver<Tick>> {
        self.stream(StreamKey::ticks(symbol), json!({ "ticks": symbol }), |frame| {
            frame.payload("tick")
        })
    }

    /// Stream candles for `symbol`
    ///
    /// The first item is the recent history (`count` candles); every later
    /// item holds the single candle being updated.
    pub fn subscribe_candles(
        &self,
        symbol: &str,
        granularity: u32,
        count: u32,
    ) -> Result<StreamReceiver<Vec<Candle>>> {
        let frame = json!({
            "ticks_history": symbol,
            "style": "candles",
            "granularity": granularity,
            "count": count,
            "end": "latest",
            "adjust_start_time": 1
        });
        self.stream(StreamKey::candles(symbol), frame, |frame| {
            match frame.msg_type.as_str() {
                "ohlc" => Ok(vec![frame.payload("ohlc")?]),
                _ => frame.payload("candles"),
            }
        })
    }

    pub fn subscribe_balance(&self) -> Result<StreamReceiver<Balance>> {
        self.stream(StreamKey::balance(), json!({ "balance": 1 }), |frame| {
            frame.payload("balance")
        })
    }

    pub fn subscribe_portfolio(&self) -> Result<StreamReceiver<Portfolio>> {
        self.stream(StreamKey::portfolio(), json!({ "portfolio": 1 }), |frame| {
            frame.payload("portfolio")
        })
    }

    /// Stream re-priced quotes; streams are keyed by contract type
    pub fn subscribe_proposal(&self, params: &ContractParameters) -> Result<StreamReceiver<Proposal>> {
        let mut frame = serde_json::to_value(params)?;
        insert(&mut frame, "proposal", json!(1))?;
        self.stream(StreamKey::proposal(&params.contract_type), frame, |frame| {
            frame.payload("proposal")
        })
    }

    /// Stream lifecycle updates for one purchased contract
    pub fn subscribe_open_contract(&self, contract_id: u64) -> Result<StreamReceiver<OpenContract>> {
        self.stream(
            StreamKey::open_contract(contract_id),
            json!({ "proposal_open_contract": 1, "contract_id": contract_id }),
            |frame| frame.payload("proposal_open_contract"),
        )
    }

    pub fn unsubscribe(&self, key: &StreamKey) -> Result<()> {
        self.transport.unsubscribe(key)
    }

    pub fn forget_all(&self, kind: StreamKind) -> Result<()> {
        self.transport.forget_all(kind)
    }

    pub fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.transport.status_events()
    }

    async fn call<T: DeserializeOwned>(&self, frame: Value, field: &str) -> Result<T> {
        self.transport.request(frame).await?.into_payload(field)
    }

    /// Subscribe with a listener that decodes each frame into a channel
    fn stream<T, F>(&self, key: StreamKey, frame: Value, decode: F) -> Result<StreamReceiver<T>>
    where
        T: Send + 'static,
        F: Fn(&InboundFrame) -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = create_stream_channel();
        let listener: Listener = Arc::new(move |frame: &InboundFrame| {
            let item = match &frame.error {
                Some(err) => Err(ClientError::Venue(err.clone())),
                None => decode(frame),
            };
            // Receiver gone means the consumer lost interest
            let _ = tx.send(item);
        });
        self.transport.subscribe(key, frame, listener)?;
        Ok(rx)
    }
}

fn insert(frame: &mut Value, field: &str, value: Value) -> Result<()> {
    frame
        .as_object_mut()
        .ok_or_else(|| ClientError::InvalidRequest("frame must be a JSON object".to_string()))?
        .insert(field.to_string(), value);
    Ok(())
}

/// Prices go on the wire as JSON numbers
fn number(value: Decimal) -> Result<Value> {
    value
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ClientError::InvalidRequest(format!("price {} is not representable", value)))
}
