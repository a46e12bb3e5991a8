use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Producer-agnostic trade request, the input to the executor. Optional
/// fields are validated at execution time; a missing one rejects the intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeIntent {
    pub pair: String,
    pub signal: Option<TradeSignal>,
    /// Signal conviction in [0, 1]
    pub strength: Option<Decimal>,
    /// Order size in base currency
    pub size: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSignal {
    Buy,
    Sell,
}

impl TradeSignal {
    pub fn as_order_side(&self) -> &'static str {
        match self {
            TradeSignal::Buy => "buy",
            TradeSignal::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_order_side())
    }
}

/// Lifecycle of a tracked order.
///
/// Pending means the primary order was accepted by the exchange; Open means
/// protective order placement has been attempted (successfully or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Closed,
    Cancelled,
    Error,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Open => "open",
            OrderStatus::Closed => "closed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// A tracked order as the executor sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Exchange transaction id of the primary order
    pub txid: String,
    pub pair: String,
    pub side: TradeSignal,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub leverage: u32,
    pub status: OrderStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub pnl: Option<Decimal>,
}

/// Fields of an order placement request as sent to the exchange API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: String,
    /// "buy" or "sell"
    pub side: String,
    /// "market", "stop-loss", "take-profit", ...
    pub order_type: String,
    pub volume: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
}

/// Exchange acknowledgement of an order placement
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    /// Transaction ids assigned by the exchange; empty means rejected
    pub txid: Vec<String>,
}

/// One entry from the exchange's open-orders listing
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderInfo {
    pub pair: String,
    pub status: String,
    pub volume: Decimal,
    pub volume_executed: Decimal,
}

/// One entry from the exchange's closed-orders listing
#[derive(Debug, Clone, Deserialize)]
pub struct ClosedOrderInfo {
    pub pair: String,
    pub status: String,
    /// Average fill price
    pub price: Decimal,
    pub volume_executed: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Audit record handed to the persistence sink when an order is first placed
#[derive(Debug, Clone, Serialize)]
pub struct TradeAudit {
    pub txid: String,
    pub pair: String,
    pub side: TradeSignal,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl TradeAudit {
    pub fn from_order(order: &Order) -> Self {
        Self {
            txid: order.txid.clone(),
            pair: order.pair.clone(),
            side: order.side,
            size: order.size,
            entry_price: order.entry_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            opened_at: order.opened_at,
        }
    }
}

/// Fields updated on the persisted record when an order reaches a terminal
/// state
#[derive(Debug, Clone, Serialize)]
pub struct TradeUpdate {
    pub status: OrderStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub pnl: Option<Decimal>,
}

/// Executor counters, snapshotted for the presentation layer
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStats {
    pub intents_received: u64,
    pub intents_rejected: u64,
    pub orders_placed: u64,
    pub orders_closed: u64,
    pub orders_errored: u64,
    pub volume_traded: Decimal,
    pub protective_failures: u64,
    pub monitoring_stopped: bool,
}

/// Snapshot of the orders the executor is currently tracking
pub type ActiveOrders = HashMap<String, Order>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_request_serialization_skips_absent_fields() {
        let request = OrderRequest {
            pair: "XXBTZUSD".to_string(),
            side: "buy".to_string(),
            order_type: "market".to_string(),
            volume: dec!(0.5),
            price: None,
            leverage: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("price").is_none());
        assert!(json.get("leverage").is_none());
        assert_eq!(json["order_type"], "market");
    }

    #[test]
    fn test_trade_signal_maps_to_order_side() {
        assert_eq!(TradeSignal::Buy.as_order_side(), "buy");
        assert_eq!(TradeSignal::Sell.as_order_side(), "sell");
    }

    #[test]
    fn test_order_status_display() {
        assert_eq!(OrderStatus::Pending.to_string(), "pending");
        assert_eq!(OrderStatus::Error.to_string(), "error");
    }
}
