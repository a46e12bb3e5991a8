//! Collaborator interfaces consumed by the executor
//!
//! Each trait lists exactly the methods the executor calls, so a test double
//! or a thin REST adapter can stand in without proxying a wider API surface.

use crate::execution::types::{
    ClosedOrderInfo, OpenOrderInfo, OrderAck, OrderRequest, TradeAudit, TradeIntent, TradeUpdate,
};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("exchange request failed: {0}")]
    Request(String),
    #[error("exchange rejected order: {0}")]
    Rejected(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// The slice of the exchange's private REST API the executor uses.
#[async_trait]
pub trait ExchangeOrderApi: Send + Sync {
    /// Place an order; an ack with at least one txid means accepted.
    async fn create_order(&self, request: OrderRequest) -> Result<OrderAck, ApiError>;

    /// Currently open orders, keyed by txid.
    async fn open_orders(&self) -> Result<HashMap<String, OpenOrderInfo>, ApiError>;

    /// Recently closed orders, keyed by txid.
    async fn closed_orders(&self) -> Result<HashMap<String, ClosedOrderInfo>, ApiError>;
}

/// Accept/reject boundary to the risk subsystem.
#[async_trait]
pub trait RiskGate: Send + Sync {
    async fn check_trade(&self, intent: &TradeIntent) -> bool;
}

/// Best-effort audit sink; failures are logged by the caller, never
/// propagated into the order flow.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn record_trade(&self, audit: TradeAudit) -> Result<(), ApiError>;

    async fn update_trade(&self, txid: &str, update: TradeUpdate) -> Result<(), ApiError>;
}
