//! Price history and the indicator queries trade programs evaluate

use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::common::types::Tick;

/// Queries a trade-intent predicate may ask of recent prices
pub trait MarketData {
    /// Latest tick, if any arrived yet
    fn current_tick(&self) -> Option<&Tick>;

    /// SMA over `period` quotes as it stood `back` ticks ago
    fn sma_at(&self, period: usize, back: usize) -> Option<Decimal>;

    /// Simple moving average over the last `period` quotes
    fn sma_at(&self, period: usize, back: usize) -> Option<Decimal> {
        if period == 0 || self.ticks.len() < period + back {
            return None;
        }
        let end = self.ticks.len() - back;
        let sum: Decimal = self
            .ticks
            .range(end - period..end)
            .map(|tick| tick.quote)
            .sum();
        Some(sum / Decimal::from(period))
    }

    /// Relative strength index over the last `period` price changes
    fn rsi(&self, period: usize) -> Option<Decimal>;
}

/// Bounded tick history, oldest first
#[derive(Debug, Clone)]
pub struct TickHistory {
    ticks: VecDeque<Tick>,
    capacity: usize,
}

impl TickHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, tick: Tick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

}

impl MarketData for TickHistory {
    fn current_tick(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    fn sma_at(&self, period: usize, back: usize) -> Option<Decimal> {
        if period == 0 || self.ticks.len() < period + back {
            return None;
        }
        let end = self.ticks.len() - back;
        let sum: Decimal = self
            .ticks
            .range(end - period..end)
            .map(|tick| tick.quote)
            .sum();
        Some(sum / Decimal::from(period))
    }

    fn rsi(&self, period: usize) -> Option<Decimal> {
        if period == 0 || self.ticks.len() < period + 1 {
            return None;
        }
        let start = self.ticks.len() - period - 1;
        let quotes: Vec<Decimal> = self.ticks.range(start..).map(|tick| tick.quote).collect();

        let (mut gains, mut losses) = (Decimal::ZERO, Decimal::ZERO);
        for pair in quotes.windows(2) {
            let change = pair[1] - pair[0];
            if change > Decimal::ZERO {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let hundred = Decimal::ONE_HUNDRED;
        if losses.is_zero() {
            return Some(if gains.is_zero() { hundred / Decimal::TWO } else { hundred });
        }
        let strength = gains / losses;
        Some(hundred - hundred / (Decimal::ONE + strength))
    }
}
