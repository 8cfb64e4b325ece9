//! Execution seam between the bot engine and the venue

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::common::channels::StreamReceiver;
use crate::common::errors::Result;
use crate::common::types::Tick;
use crate::venue::gateway::VenueGateway;
use crate::venue::messages::{BuyReceipt, ContractParameters, OpenContract, Proposal, SellReceipt};
use crate::venue::subscription::StreamKey;

/// Venue operations the trading loop relies on
///
/// [`VenueGateway`] is the production implementation; tests script their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    /// Price a contract
    async fn proposal(&self, params: &ContractParameters) -> Result<Proposal>;

    /// Buy a priced proposal
    async fn buy(&self, proposal_id: &str, price: Decimal) -> Result<BuyReceipt>;

    /// Sell an open contract early
    async fn sell(&self, contract_id: u64, price: Decimal) -> Result<SellReceipt>;

    /// Stream lifecycle updates of a purchased contract
    fn watch_contract(&self, contract_id: u64) -> Result<StreamReceiver<OpenContract>>;

    /// Poll a contract once
    async fn contract_status(&self, contract_id: u64) -> Result<OpenContract>;

    /// Stream ticks for the instrument being traded
    fn watch_ticks(&self, symbol: &str) -> Result<StreamReceiver<Tick>>;

    /// Release a stream opened by `watch_contract` or `watch_ticks`
    fn release(&self, key: &StreamKey) -> Result<()>;
}

#[async_trait]
impl ExecutionVenue for VenueGateway {
    async fn proposal(&self, params: &ContractParameters) -> Result<Proposal> {
        VenueGateway::proposal(self, params).await
    }

    async fn buy(&self, proposal_id: &str, price: Decimal) -> Result<BuyReceipt> {
        VenueGateway::buy(self, proposal_id, price).await
    }

    async fn sell(&self, contract_id: u64, price: Decimal) -> Result<SellReceipt> {
        VenueGateway::sell(self, contract_id, price).await
    }

    fn watch_contract(&self, contract_id: u64) -> Result<StreamReceiver<OpenContract>> {
        self.subscribe_open_contract(contract_id)
    }

    async fn contract_status(&self, contract_id: u64) -> Result<OpenContract> {
        VenueGateway::contract_status(self, contract_id).await
    }

    fn watch_ticks(&self, symbol: &str) -> Result<StreamReceiver<Tick>> {
        self.subscribe_ticks(symbol)
    }

    fn release(&self, key: &StreamKey) -> Result<()> {
        self.unsubscribe(key)
    }
}
