//! Trade-intent programs
//!
//! A program is the output of an external rule editor: an ordered list of
//! purchase and sell directives, each guarded by an optional predicate over
//! simple indicators. The engine evaluates it once per loop iteration.
//!
//! ```json
//! {
//!   "statements": [
//!     {"action": "purchase", "contract": {"kind": "fall"},
//!      "when": {"indicator": "rsi", "period": 14, "op": "above", "value": 70}},
//!     {"action": "purchase", "contract": {"kind": "rise"},
//!      "when": {"indicator": "rsi", "period": 14, "op": "below", "value": 30}}
//!   ]
//! }
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::config::ContractKind;
use super::indicators::MarketData;
use crate::common::errors::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Above,
    Below,
}

impl Comparison {
    fn holds(&self, left: Decimal, right: Decimal) -> bool {
        match self {
            Comparison::Above => left > right,
            Comparison::Below => left < right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossDirection {
    /// Fast average crossed above the slow one on the latest tick
    Up,
    Down,
}

/// Boolean test over recent price data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum Predicate {
    /// N-period RSI compared against a constant
    Rsi {
        period: usize,
        op: Comparison,
        value: Decimal,
    },
    /// Current price compared against its N-period SMA
    Sma { period: usize, op: Comparison },
    /// Fast SMA crossing the slow SMA
    SmaCross {
        fast: usize,
        slow: usize,
        direction: CrossDirection,
    },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    /// Evaluate against price history; missing data makes a test false
    pub fn evaluate<M: MarketData + ?Sized>(&self, data: &M) -> bool {
        match self {
            Predicate::Rsi { period, op, value } => data
                .rsi(*period)
                .map_or(false, |rsi| op.holds(rsi, *value)),
            Predicate::Sma { period, op } => match (data.current_tick(), data.sma(*period)) {
                (Some(tick), Some(sma)) => op.holds(tick.quote, sma),
                _ => false,
            },
            Predicate::SmaCross {
                fast,
                slow,
                direction,
            } => {
                let now = data.sma(*fast).zip(data.sma(*slow));
                let before = data.sma_at(*fast, 1).zip(data.sma_at(*slow, 1));
                match (now, before) {
                    (Some((fast_now, slow_now)), Some((fast_before, slow_before))) => {
                        match direction {
                            CrossDirection::Up => fast_before <= slow_before && fast_now > slow_now,
                            CrossDirection::Down => {
                                fast_before >= slow_before && fast_now < slow_now
                            }
                        }
                    }
                    _ => false,
                }
            }
            Predicate::All { of } => of.iter().all(|p| p.evaluate(data)),
            Predicate::Any { of } => of.iter().any(|p| p.evaluate(data)),
            Predicate::Not { predicate } => !predicate.evaluate(data),
        }
    }

    /// Longest look-back any part of this predicate needs
    pub fn lookback(&self) -> usize {
        match self {
            Predicate::Rsi { period, .. } => period + 1,
            Predicate::Sma { period, .. } => *period,
            Predicate::SmaCross { fast, slow, .. } => fast.max(slow) + 1,
            Predicate::All { of } | Predicate::Any { of } => {
                of.iter().map(Predicate::lookback).max().unwrap_or(0)
            }
            Predicate::Not { predicate } => predicate.lookback(),
        }
    }
}

/// One directive of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Statement {
    /// Buy `contract` when `when` holds (or unconditionally)
    Purchase {
        contract: ContractKind,
        #[serde(default)]
        when: Option<Predicate>,
    },
    /// Sell the open contract early when `when` holds
    Sell { when: Predicate },
}

/// Ordered list of directives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeProgram {
    pub statements: Vec<Statement>,
}

impl TradeProgram {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    /// Parse a program emitted by the rule editor
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ClientError::Configuration(format!("invalid trade program: {}", e)))
    }

    /// Contract of the first purchase directive whose predicate holds
    pub fn next_purchase<M: MarketData + ?Sized>(&self, data: &M) -> Option<ContractKind> {
        self.statements.iter().find_map(|statement| match statement {
            Statement::Purchase { contract, when } => {
                let holds = when.as_ref().map_or(true, |p| p.evaluate(data));
                holds.then_some(*contract)
            }
            Statement::Sell { .. } => None,
        })
    }

    /// True if any sell directive holds
    pub fn should_sell<M: MarketData + ?Sized>(&self, data: &M) -> bool {
        self.statements.iter().any(|statement| match statement {
            Statement::Sell { when } => when.evaluate(data),
            Statement::Purchase { .. } => false,
        })
    }

    /// True if any directive reads price data
    pub fn needs_ticks(&self) -> bool {
        self.lookback() > 0
    }

    /// Ticks the history must hold for every predicate to be decidable
    pub fn lookback(&self) -> usize {
        self.statements
            .iter()
            .filter_map(|statement| match statement {
                Statement::Purchase { when, .. } => when.as_ref().map(Predicate::lookback),
                Statement::Sell { when } => Some(when.lookback()),
            })
            .max()
            .unwrap_or(0)
    }

    /// Reject a program that could never trade
    ///
    /// Every purchase contract must be valid and every predicate must be
    /// decidable within `tick_capacity` ticks of history.
    pub fn validate(&self, tick_capacity: usize) -> Result<()> {
        for statement in &self.statements {
            if let Statement::Purchase { contract, .. } = statement {
                contract.validate()?;
            }
        }
        let lookback = self.lookback();
        if lookback > tick_capacity {
            return Err(ClientError::Configuration(format!(
                "program needs {} ticks but the tick history holds {}",
                lookback, tick_capacity
            )));
        }
        Ok(())
    }

    pub fn has_sell_rules(&self) -> bool {
        self.statements
            .iter()
            .any(|statement| matches!(statement, Statement::Sell { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::indicators::TickHistory;
    use crate::common::types::Tick;
    use rust_decimal_macros::dec;

    fn history(quotes: &[Decimal]) -> TickHistory {
        let mut history = TickHistory::new(50);
        for quote in quotes {
            history.push(Tick {
                symbol: "R_100".to_string(),
                epoch: 0,
                quote: *quote,
                bid: None,
                ask: None,
                pip_size: None,
            });
        }
        history
    }

    const RSI_PROGRAM: &str = r#"{
        "statements": [
            {"action": "purchase", "contract": {"kind": "fall"},
             "when": {"indicator": "rsi", "period": 3, "op": "above", "value": 70}},
            {"action": "purchase", "contract": {"kind": "rise"},
             "when": {"indicator": "rsi", "period": 3, "op": "below", "value": 30}}
        ]
    }"#;

    #[test]
    fn test_first_matching_purchase_wins() {
        let program = TradeProgram::from_json(RSI_PROGRAM).unwrap();
        assert!(program.needs_ticks());
        assert_eq!(program.lookback(), 4);

        let rising = history(&[dec!(1), dec!(2), dec!(3), dec!(4)]);
        assert_eq!(program.next_purchase(&rising), Some(ContractKind::Fall));

        let falling = history(&[dec!(4), dec!(3), dec!(2), dec!(1)]);
        assert_eq!(program.next_purchase(&falling), Some(ContractKind::Rise));

        let short = history(&[dec!(1)]);
        assert_eq!(program.next_purchase(&short), None);
    }

    #[test]
    fn test_unconditional_purchase_needs_no_ticks() {
        let program = TradeProgram::new(vec![Statement::Purchase {
            contract: ContractKind::DigitEven,
            when: None,
        }]);
        assert!(!program.needs_ticks());
        assert_eq!(program.next_purchase(&history(&[])), Some(ContractKind::DigitEven));
    }

    #[test]
    fn test_sma_cross_up() {
        let cross = Predicate::SmaCross {
            fast: 1,
            slow: 3,
            direction: CrossDirection::Up,
        };
        // Fast was below slow, latest tick jumps above
        let data = history(&[dec!(5), dec!(5), dec!(4), dec!(8)]);
        assert!(cross.evaluate(&data));
        assert!(!Predicate::Not { predicate: Box::new(cross.clone()) }.evaluate(&data));

        let flat = history(&[dec!(5), dec!(5), dec!(5), dec!(5)]);
        assert!(!cross.evaluate(&flat));
    }

    #[test]
    fn test_sell_rule_and_combinators() {
        let program = TradeProgram::new(vec![Statement::Sell {
            when: Predicate::All {
                of: vec![
                    Predicate::Sma { period: 2, op: Comparison::Above },
                    Predicate::Any { of: vec![] },
                ],
            },
        }]);
        assert!(program.has_sell_rules());
        // Empty `any` never holds
        assert!(!program.should_sell(&history(&[dec!(1), dec!(3)])));
    }

    #[test]
    fn test_invalid_program_is_configuration_error() {
        let err = TradeProgram::from_json(r#"{"statements": [{"action": "hold"}]}"#).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_undecidable_lookback() {
        let program = TradeProgram::from_json(RSI_PROGRAM).unwrap();
        assert!(program.validate(4).is_ok());
        let err = program.validate(3).unwrap_err();
        assert!(matches!(err, ClientError::Configuration(_)));
    }

    #[test]
    fn test_validate_checks_purchase_contracts() {
        let program = TradeProgram::new(vec![
            Statement::Purchase { contract: ContractKind::Rise, when: None },
            Statement::Purchase {
                contract: ContractKind::DigitMatch { digit: 12 },
                when: None,
            },
        ]);
        assert!(matches!(program.validate(200), Err(ClientError::Configuration(_))));
    }

    /// Fixed indicator readings
    struct Readings {
        rsi: Decimal,
        fast: [Decimal; 2],
        slow: [Decimal; 2],
    }

    impl MarketData for Readings {
        fn current_tick(&self) -> Option<&Tick> {
            None
        }

        fn sma_at(&self, period: usize, back: usize) -> Option<Decimal> {
            let series = if period == 1 { &self.fast } else { &self.slow };
            series.get(back).copied()
        }

        fn rsi(&self, _period: usize) -> Option<Decimal> {
            Some(self.rsi)
        }
    }

    #[test]
    fn test_predicates_read_any_market_data() {
        let data = Readings {
            rsi: dec!(82),
            fast: [dec!(11), dec!(9)],
            slow: [dec!(10), dec!(10)],
        };
        let program = TradeProgram::from_json(RSI_PROGRAM).unwrap();
        assert_eq!(program.next_purchase(&data), Some(ContractKind::Fall));

        let cross = Predicate::SmaCross {
            fast: 1,
            slow: 5,
            direction: CrossDirection::Up,
        };
        assert!(cross.evaluate(&data));
        // No current tick, so a price-vs-average test cannot hold
        assert!(!Predicate::Sma { period: 5, op: Comparison::Below }.evaluate(&data));
    }
}
