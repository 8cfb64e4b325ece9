//! Run statistics and trade history

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::common::types::{Outcome, Trade};

/// Aggregate of one bot run, updated only on settlement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub runs: u32,
    pub won: u32,
    pub lost: u32,
    pub total_stake: Decimal,
    pub total_payout: Decimal,
    pub net_profit: Decimal,
}

impl RunStats {
    /// Fold one settled trade into the totals; pending trades are ignored
    pub fn record(&mut self, trade: &Trade) {
        match trade.outcome {
            Outcome::Won => self.won += 1,
            Outcome::Lost => self.lost += 1,
            Outcome::Pending => return,
        }
        self.runs += 1;
        self.total_stake += trade.stake;
        self.total_payout += trade.payout;
        self.net_profit = self.profit();
    }

    /// Cumulative payout minus cumulative stake
    pub fn profit(&self) -> Decimal {
        self.total_payout - self.total_stake
    }

    /// Share of settled trades that won, 0 before the first settlement
    pub fn win_rate(&self) -> Decimal {
        if self.runs == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.won) / Decimal::from(self.runs)
    }
}

/// Bounded trade list, most recent first
#[derive(Debug, Clone)]
pub struct TradeHistory {
    trades: VecDeque<Trade>,
    capacity: usize,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            trades: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a trade, or replace the entry with the same contract id in place
    pub fn upsert(&mut self, trade: Trade) {
        if let Some(existing) = self
            .trades
            .iter_mut()
            .find(|t| t.contract_id == trade.contract_id)
        {
            *existing = trade;
            return;
        }
        self.trades.push_front(trade);
        self.trades.truncate(self.capacity);
    }

    pub fn snapshot(&self) -> Vec<Trade> {
        self.trades.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
