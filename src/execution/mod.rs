//! Order lifecycle management
//!
//! Trade intents arrive from external strategies, pass a risk gate, become
//! exchange orders with protective stop-loss/take-profit legs, and are then
//! tracked by a monitor loop until they reach a terminal state.

pub mod api;
pub mod executor;
pub mod types;

pub use api::{ApiError, ExchangeOrderApi, RiskGate, TradeStore};
pub use executor::TradeExecutor;
pub use types::{
    ExecutorStats, Order, OrderAck, OrderRequest, OrderStatus, TradeAudit, TradeIntent,
    TradeSignal, TradeUpdate,
};
