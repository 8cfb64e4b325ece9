//! Venue wire message types
//!
//! Outbound frames are JSON objects carrying the operation's parameters plus
//! an integer `req_id` (and `subscribe: 1` for streams). Inbound frames carry
//! a `msg_type` discriminant, the echoed `req_id`, optionally an `error`
//! object, and a `subscription` marker when they belong to a durable stream.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::errors::{ClientError, Result, VenueError};

/// Marker attached to frames that belong to a venue-side stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMarker {
    /// Venue stream id, used to `forget` the stream
    pub id: String,
}

/// A decoded inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub msg_type: String,
    #[serde(default)]
    pub req_id: Option<u64>,
    #[serde(default)]
    pub error: Option<VenueError>,
    #[serde(default)]
    pub subscription: Option<SubscriptionMarker>,
    /// Copy of the request this frame answers
    #[serde(default)]
    pub echo_req: Value,
    /// Remaining fields; the payload lives under the `msg_type` key
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl InboundFrame {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Turn an embedded venue error into `Err`
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) => Err(ClientError::Venue(err)),
            None => Ok(self),
        }
    }

    /// Venue stream id, if this frame belongs to a stream
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription.as_ref().map(|s| s.id.as_str())
    }

    /// Read a string field from the echoed request
    pub fn echo_str(&self, field: &str) -> Option<String> {
        match self.echo_req.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Borrow the payload stored under `field`
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Decode the payload stored under `field`
    pub fn payload<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        let value = self.body.get(field).cloned().ok_or_else(|| {
            ClientError::InvalidResponse(format!(
                "`{}` frame is missing its `{}` payload",
                self.msg_type, field
            ))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode the payload stored under `field`, consuming the frame
    pub fn into_payload<T: DeserializeOwned>(mut self, field: &str) -> Result<T> {
        let value = self.body.remove(field).ok_or_else(|| {
            ClientError::InvalidResponse(format!(
                "`{}` frame is missing its `{}` payload",
                self.msg_type, field
            ))
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Contract parameters shared by proposal requests and proposal streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractParameters {
    pub contract_type: String,
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// `stake` or `payout`
    pub basis: String,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

/// Reply to `authorize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub loginid: String,
    pub currency: String,
    pub balance: Decimal,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_virtual: bool,
    #[serde(default)]
    pub account_list: Vec<AccountSummary>,
}

/// One account the authorized user can switch to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub loginid: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_virtual: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_disabled: bool,
}

/// Entry of `active_symbols`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSymbol {
    pub symbol: String,
    pub display_name: String,
    pub market: String,
    #[serde(default)]
    pub submarket: Option<String>,
    #[serde(default, deserialize_with = "de::flag")]
    pub exchange_is_open: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_trading_suspended: bool,
    #[serde(default)]
    pub pip: Option<Decimal>,
}

impl ActiveSymbol {
    pub fn is_tradeable(&self) -> bool {
        self.exchange_is_open && !self.is_trading_suspended
    }
}

/// Priced offer for a contract, valid briefly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub ask_price: Decimal,
    pub payout: Decimal,
    #[serde(default)]
    pub spot: Option<Decimal>,
    #[serde(default)]
    pub spot_time: Option<i64>,
    #[serde(default)]
    pub longcode: Option<String>,
}

/// Reply to `buy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyReceipt {
    #[serde(deserialize_with = "de::u64_or_string")]
    pub contract_id: u64,
    pub buy_price: Decimal,
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
    #[serde(default)]
    pub transaction_id: Option<u64>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub longcode: Option<String>,
}

/// Reply to `sell`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellReceipt {
    #[serde(deserialize_with = "de::u64_or_string")]
    pub contract_id: u64,
    pub sold_for: Decimal,
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub transaction_id: Option<u64>,
}

/// Reply to `statement`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub transactions: Vec<StatementEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementEntry {
    pub action_type: String,
    pub amount: Decimal,
    #[serde(default)]
    pub balance_after: Option<Decimal>,
    #[serde(default)]
    pub contract_id: Option<u64>,
    #[serde(default)]
    pub transaction_id: Option<u64>,
    #[serde(default)]
    pub transaction_time: Option<i64>,
    #[serde(default)]
    pub longcode: Option<String>,
}

/// Balance update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Decimal,
    pub currency: String,
    #[serde(default)]
    pub loginid: Option<String>,
}

/// Open positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub contracts: Vec<PortfolioContract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioContract {
    #[serde(deserialize_with = "de::u64_or_string")]
    pub contract_id: u64,
    pub contract_type: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub buy_price: Decimal,
    #[serde(default)]
    pub payout: Option<Decimal>,
    #[serde(default)]
    pub purchase_time: Option<i64>,
    #[serde(default)]
    pub expiry_time: Option<i64>,
}

/// Lifecycle snapshot of one purchased contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenContract {
    #[serde(deserialize_with = "de::u64_or_string")]
    pub contract_id: u64,
    #[serde(default)]
    pub contract_type: Option<String>,
    #[serde(default)]
    pub underlying: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub buy_price: Option<Decimal>,
    #[serde(default)]
    pub sell_price: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub current_spot: Option<Decimal>,
    #[serde(default)]
    pub entry_spot: Option<Decimal>,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_sold: bool,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_expired: bool,
}

impl OpenContract {
    /// Amount received at settlement, zero for a lost contract
    pub fn settled_payout(&self) -> Decimal {
        self.sell_price.unwrap_or_default()
    }
}

/// Lenient decoders for the venue's loosely typed fields
mod de {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;
    use serde_json::Value;

    /// Accept `0`/`1`, booleans or null
    pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
            Value::Null => Ok(false),
            other => Err(de::Error::custom(format!("expected flag, got {}", other))),
        }
    }

    /// Ids arrive as numbers or numeric strings depending on the endpoint
    pub fn u64_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| de::Error::custom(format!("invalid id {}", n))),
            Value::String(s) => s.parse().map_err(de::Error::custom),
            other => Err(de::Error::custom(format!("expected id, got {}", other))),
        }
    }
}
