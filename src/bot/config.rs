//! Trade configuration for one bot run

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::staking::StakingStrategy;
use crate::common::errors::{ClientError, Result};
use crate::venue::messages::ContractParameters;

/// Kind of contract the bot buys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractKind {
    /// Exit spot strictly higher than entry spot
    Rise,
    /// Exit spot strictly lower than entry spot
    Fall,
    /// Last digit equals `digit`
    DigitMatch { digit: u8 },
    /// Last digit differs from `digit`
    DigitDiffer { digit: u8 },
    DigitOver { digit: u8 },
    DigitUnder { digit: u8 },
    DigitEven,
    DigitOdd,
}

impl ContractKind {
    /// Contract type as the venue names it
    pub fn contract_type(&self) -> &'static str {
        match self {
            ContractKind::Rise => "CALL",
            ContractKind::Fall => "PUT",
            ContractKind::DigitMatch { .. } => "DIGITMATCH",
            ContractKind::DigitDiffer { .. } => "DIGITDIFF",
            ContractKind::DigitOver { .. } => "DIGITOVER",
            ContractKind::DigitUnder { .. } => "DIGITUNDER",
            ContractKind::DigitEven => "DIGITEVEN",
            ContractKind::DigitOdd => "DIGITODD",
        }
    }

    /// Barrier sent with the proposal, for digit contracts that take one
    pub fn barrier(&self) -> Option<String> {
        match self {
            ContractKind::DigitMatch { digit }
            | ContractKind::DigitDiffer { digit }
            | ContractKind::DigitOver { digit }
            | ContractKind::DigitUnder { digit } => Some(digit.to_string()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ContractKind::DigitMatch { digit } | ContractKind::DigitDiffer { digit } if *digit > 9 => {
                Err(ClientError::Configuration(format!("digit {} is out of range 0-9", digit)))
            }
            // Over 9 and under 0 can never win
            ContractKind::DigitOver { digit } if *digit > 8 => {
                Err(ClientError::Configuration(format!("digit over {} can never win", digit)))
            }
            ContractKind::DigitUnder { digit } if *digit == 0 || *digit > 9 => {
                Err(ClientError::Configuration(format!("digit under {} can never win", digit)))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for ContractKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.barrier() {
            Some(barrier) => write!(f, "{}({})", self.contract_type(), barrier),
            None => write!(f, "{}", self.contract_type()),
        }
    }
}

/// Unit of a contract duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "t")]
    Ticks,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl DurationUnit {
    /// Code the venue expects in `duration_unit`
    pub fn code(&self) -> &'static str {
        match self {
            DurationUnit::Ticks => "t",
            DurationUnit::Seconds => "s",
            DurationUnit::Minutes => "m",
            DurationUnit::Hours => "h",
            DurationUnit::Days => "d",
        }
    }
}

fn default_contract() -> ContractKind {
    ContractKind::Rise
}

fn default_duration() -> u32 {
    5
}

fn default_duration_unit() -> DurationUnit {
    DurationUnit::Ticks
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Immutable input to one bot run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Instrument symbol, e.g. `R_100`
    pub symbol: String,
    /// First stake, and the unit every staking strategy works in
    pub initial_stake: Decimal,
    #[serde(default = "default_contract")]
    pub contract: ContractKind,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default = "default_duration_unit")]
    pub duration_unit: DurationUnit,
    #[serde(default)]
    pub staking: StakingStrategy,
    /// Stop once net profit falls to `-stop_loss`
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Stop once net profit reaches `take_profit`
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    /// Account currency
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Stop after this many settled trades
    #[serde(default)]
    pub max_runs: Option<u32>,
}

impl TradeConfig {
    /// Rise contract over five ticks with martingale staking
    pub fn new(symbol: impl Into<String>, initial_stake: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            initial_stake,
            contract: default_contract(),
            duration: default_duration(),
            duration_unit: default_duration_unit(),
            staking: StakingStrategy::default(),
            stop_loss: None,
            take_profit: None,
            currency: default_currency(),
            max_runs: None,
        }
    }

    pub fn with_contract(mut self, contract: ContractKind) -> Self {
        self.contract = contract;
        self
    }

    pub fn with_duration(mut self, duration: u32, unit: DurationUnit) -> Self {
        self.duration = duration;
        self.duration_unit = unit;
        self
    }

    pub fn with_staking(mut self, staking: StakingStrategy) -> Self {
        self.staking = staking;
        self
    }

    pub fn with_stop_loss(mut self, stop_loss: Decimal) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Reject configurations that cannot start a run
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(ClientError::Configuration("symbol must not be empty".to_string()));
        }
        if self.initial_stake <= Decimal::ZERO {
            return Err(ClientError::Configuration(format!(
                "initial stake must be positive, got {}",
                self.initial_stake
            )));
        }
        if self.duration == 0 {
            return Err(ClientError::Configuration("duration must be at least 1".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(ClientError::Configuration("currency must not be empty".to_string()));
        }
        for (name, limit) in [("stop loss", self.stop_loss), ("take profit", self.take_profit)] {
            if let Some(limit) = limit {
                if limit <= Decimal::ZERO {
                    return Err(ClientError::Configuration(format!(
                        "{} must be positive, got {}",
                        name, limit
                    )));
                }
            }
        }
        if self.max_runs == Some(0) {
            return Err(ClientError::Configuration("max runs must be at least 1".to_string()));
        }
        self.contract.validate()
    }

    /// Proposal parameters for `kind` at `stake`
    pub fn contract_parameters(&self, kind: ContractKind, stake: Decimal) -> ContractParameters {
        ContractParameters {
            contract_type: kind.contract_type().to_string(),
            symbol: self.symbol.clone(),
            amount: stake,
            basis: "stake".to_string(),
            currency: self.currency.clone(),
            duration: self.duration,
            duration_unit: self.duration_unit.code().to_string(),
            barrier: kind.barrier(),
        }
    }
}
