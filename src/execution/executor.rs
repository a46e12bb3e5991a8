//! Order lifecycle: risk gate, timed placement, protective orders, and the
//! monitor loop that advances tracked orders to a terminal state.
//!
//! The monitor loop deliberately differs from the session's reconnect loop:
//! it backs off exponentially and permanently stops after a configured run
//! of consecutive failures, until `restart_monitoring()` is called.

use crate::config::ExecutorConfig;
use crate::execution::api::{ExchangeOrderApi, RiskGate, TradeStore};
use crate::execution::types::{
    ExecutorStats, Order, OrderRequest, OrderStatus, TradeAudit, TradeIntent, TradeSignal,
    TradeUpdate,
};
use crate::ws::state::MarketCache;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

pub struct TradeExecutor {
    config: ExecutorConfig,
    api: Arc<dyn ExchangeOrderApi>,
    risk: Arc<dyn RiskGate>,
    store: Arc<dyn TradeStore>,
    cache: Arc<MarketCache>,
    active: Arc<DashMap<String, Order>>,
    stats: Arc<Mutex<ExecutorStats>>,
    monitoring_stopped: Arc<AtomicBool>,
    monitor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TradeExecutor {
    pub fn new(
        config: ExecutorConfig,
        api: Arc<dyn ExchangeOrderApi>,
        risk: Arc<dyn RiskGate>,
        store: Arc<dyn TradeStore>,
        cache: Arc<MarketCache>,
    ) -> Self {
        Self {
            config,
            api,
            risk,
            store,
            cache,
            active: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
            monitoring_stopped: Arc::new(AtomicBool::new(false)),
            monitor: tokio::sync::Mutex::new(None),
        }
    }

    /// Run a trade intent through the full placement flow. Rejections
    /// (missing fields, risk gate) and placement failures are logged and
    /// counted; nothing is raised and nothing is registered in those cases.
    pub async fn execute_trade(&self, intent: TradeIntent) {
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.intents_received += 1;
        }

        let Some(validated) = self.validate(&intent) else {
            self.count_rejection();
            return;
        };

        if !self.risk.check_trade(&intent).await {
            info!(pair = %intent.pair, "risk gate rejected trade intent");
            self.count_rejection();
            return;
        }

        let entry_price = self.cache.ticker_or_default(&intent.pair).close;
        let primary = OrderRequest {
            pair: intent.pair.clone(),
            side: validated.signal.as_order_side().to_string(),
            order_type: "market".to_string(),
            volume: validated.size,
            price: None,
            leverage: Some(self.config.leverage),
        };

        let ack = match timeout(self.config.order_timeout, self.api.create_order(primary)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(err)) => {
                error!(pair = %intent.pair, %err, "primary order placement failed");
                return;
            }
            Err(_) => {
                error!(
                    pair = %intent.pair,
                    timeout = ?self.config.order_timeout,
                    "primary order placement timed out"
                );
                return;
            }
        };

        let Some(txid) = ack.txid.first().cloned() else {
            error!(pair = %intent.pair, "exchange acknowledged order without a txid");
            return;
        };

        let mut order = Order {
            txid: txid.clone(),
            pair: intent.pair.clone(),
            side: validated.signal,
            size: validated.size,
            entry_price,
            stop_loss: validated.stop_loss,
            take_profit: validated.take_profit,
            leverage: self.config.leverage,
            status: OrderStatus::Pending,
            opened_at: Utc::now(),
            closed_at: None,
            pnl: None,
        };
        self.active.insert(txid.clone(), order.clone());
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.orders_placed += 1;
        }
        info!(%txid, pair = %order.pair, side = %order.side, size = %order.size, "order placed");

        // Protective orders are best-effort: a failure here never rolls back
        // the primary, which is already live on the exchange.
        self.place_protective(&order, "stop-loss", validated.stop_loss)
            .await;
        self.place_protective(&order, "take-profit", validated.take_profit)
            .await;

        order.status = OrderStatus::Open;
        self.active.insert(txid.clone(), order.clone());

        if let Err(err) = self.store.record_trade(TradeAudit::from_order(&order)).await {
            warn!(%txid, %err, "failed to persist trade record");
        }
    }

    fn validate(&self, intent: &TradeIntent) -> Option<ValidatedIntent> {
        let missing = |field: &str| {
            warn!(pair = %intent.pair, field, "trade intent missing required field");
            None::<ValidatedIntent>
        };
        let Some(signal) = intent.signal else {
            return missing("signal");
        };
        if intent.strength.is_none() {
            return missing("strength");
        }
        let Some(size) = intent.size else {
            return missing("size");
        };
        let Some(stop_loss) = intent.stop_loss else {
            return missing("stop_loss");
        };
        let Some(take_profit) = intent.take_profit else {
            return missing("take_profit");
        };
        Some(ValidatedIntent {
            signal,
            size,
            stop_loss,
            take_profit,
        })
    }

    async fn place_protective(&self, order: &Order, order_type: &str, price: Decimal) {
        let closing_side = match order.side {
            TradeSignal::Buy => TradeSignal::Sell,
            TradeSignal::Sell => TradeSignal::Buy,
        };
        let request = OrderRequest {
            pair: order.pair.clone(),
            side: closing_side.as_order_side().to_string(),
            order_type: order_type.to_string(),
            volume: order.size,
            price: Some(price),
            leverage: Some(order.leverage),
        };
        match timeout(self.config.order_timeout, self.api.create_order(request)).await {
            Ok(Ok(ack)) => {
                info!(txid = %order.txid, order_type, protective = ?ack.txid, "protective order placed");
            }
            Ok(Err(err)) => {
                error!(txid = %order.txid, order_type, %err, "protective order placement failed");
                self.count_protective_failure();
            }
            Err(_) => {
                error!(txid = %order.txid, order_type, "protective order placement timed out");
                self.count_protective_failure();
            }
        }
    }

    fn count_rejection(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.intents_rejected += 1;
    }

    fn count_protective_failure(&self) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.protective_failures += 1;
    }

    /// Spawn the monitor loop for this executor. One transient task; call
    /// `stop_monitoring()` before dropping the executor's owner.
    pub async fn start_monitoring(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            info!("order monitoring already running");
            return;
        }
        self.monitoring_stopped.store(false, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.monitoring_stopped = false;
        }
        let task = monitor_loop(
            self.config.clone(),
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            Arc::clone(&self.active),
            Arc::clone(&self.stats),
            Arc::clone(&self.monitoring_stopped),
        );
        *monitor = Some(tokio::spawn(task));
        info!(interval = ?self.config.monitor_interval, "order monitoring started");
    }

    pub async fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
            info!("order monitoring stopped");
        }
    }

    /// Explicit restart after the loop permanently gave up.
    pub async fn restart_monitoring(&self) {
        self.stop_monitoring().await;
        self.start_monitoring().await;
    }

    /// Whether the monitor loop has permanently given up.
    pub fn monitoring_stopped(&self) -> bool {
        self.monitoring_stopped.load(Ordering::SeqCst)
    }

    pub fn active_orders(&self) -> Vec<Order> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

struct ValidatedIntent {
    signal: TradeSignal,
    size: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

fn compute_pnl(order: &Order, fill_price: Decimal, volume: Decimal) -> Decimal {
    match order.side {
        TradeSignal::Buy => (fill_price - order.entry_price) * volume,
        TradeSignal::Sell => (order.entry_price - fill_price) * volume,
    }
}

async fn monitor_loop(
    config: ExecutorConfig,
    api: Arc<dyn ExchangeOrderApi>,
    store: Arc<dyn TradeStore>,
    active: Arc<DashMap<String, Order>>,
    stats: Arc<Mutex<ExecutorStats>>,
    stopped: Arc<AtomicBool>,
) {
    let mut consecutive_failures = 0u32;
    let mut backoff = ExponentialBackoff {
        initial_interval: config.monitor_backoff_initial,
        max_interval: config.monitor_backoff_max,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };

    loop {
        sleep(config.monitor_interval).await;

        let open = match api.open_orders().await {
            Ok(open) => open,
            Err(err) => {
                consecutive_failures += 1;
                warn!(
                    %err,
                    consecutive_failures,
                    max = config.max_consecutive_failures,
                    "open-orders poll failed"
                );
                if consecutive_failures >= config.max_consecutive_failures {
                    error!(
                        consecutive_failures,
                        "order monitoring permanently stopped; restart_monitoring() required"
                    );
                    stopped.store(true, Ordering::SeqCst);
                    let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                    stats.monitoring_stopped = true;
                    return;
                }
                let delay = backoff
                    .next_backoff()
                    .unwrap_or(config.monitor_backoff_max);
                sleep(delay).await;
                continue;
            }
        };
        consecutive_failures = 0;
        backoff.reset();

        let missing: Vec<String> = active
            .iter()
            .filter(|entry| !open.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        if missing.is_empty() {
            continue;
        }

        let closed = match api.closed_orders().await {
            Ok(closed) => closed,
            Err(err) => {
                warn!(%err, "closed-orders lookup failed; retrying next cycle");
                continue;
            }
        };

        for txid in missing {
            let Some((_, mut order)) = active.remove(&txid) else {
                continue;
            };
            match closed.get(&txid) {
                Some(info) => {
                    let pnl = compute_pnl(&order, info.price, info.volume_executed);
                    order.status = OrderStatus::Closed;
                    order.closed_at = Some(info.closed_at.unwrap_or_else(Utc::now));
                    order.pnl = Some(pnl);
                    info!(%txid, %pnl, "order closed");
                    {
                        let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                        stats.orders_closed += 1;
                        stats.volume_traded += info.volume_executed;
                    }
                    let update = TradeUpdate {
                        status: OrderStatus::Closed,
                        closed_at: order.closed_at,
                        pnl: order.pnl,
                    };
                    if let Err(err) = store.update_trade(&txid, update).await {
                        warn!(%txid, %err, "failed to update persisted trade record");
                    }
                }
                None => {
                    error!(%txid, "order vanished from both open and closed listings");
                    order.status = OrderStatus::Error;
                    let mut stats = stats.lock().unwrap_or_else(|e| e.into_inner());
                    stats.orders_errored += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::api::ApiError;
    use crate::execution::types::{ClosedOrderInfo, OpenOrderInfo, OrderAck};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use tokio::time::Duration;

    struct MockApi {
        created: Mutex<Vec<OrderRequest>>,
        reject_creates: AtomicBool,
        fail_protective: AtomicBool,
        open: Mutex<HashMap<String, OpenOrderInfo>>,
        closed: Mutex<HashMap<String, ClosedOrderInfo>>,
        open_failures: AtomicU32,
        polls: AtomicU32,
    }

    impl MockApi {
        fn new() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                reject_creates: AtomicBool::new(false),
                fail_protective: AtomicBool::new(false),
                open: Mutex::new(HashMap::new()),
                closed: Mutex::new(HashMap::new()),
                open_failures: AtomicU32::new(0),
                polls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeOrderApi for MockApi {
        async fn create_order(&self, request: OrderRequest) -> Result<OrderAck, ApiError> {
            if self.reject_creates.load(Ordering::SeqCst) {
                return Err(ApiError::Rejected("insufficient funds".into()));
            }
            if self.fail_protective.load(Ordering::SeqCst) && request.order_type != "market" {
                return Err(ApiError::Request("gateway error".into()));
            }
            let n = {
                let mut created = self.created.lock().unwrap();
                created.push(request);
                created.len()
            };
            Ok(OrderAck {
                txid: vec![format!("TX{}", n)],
            })
        }

        async fn open_orders(&self) -> Result<HashMap<String, OpenOrderInfo>, ApiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.open_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.open_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ApiError::Request("503".into()));
            }
            Ok(self.open.lock().unwrap().clone())
        }

        async fn closed_orders(&self) -> Result<HashMap<String, ClosedOrderInfo>, ApiError> {
            Ok(self.closed.lock().unwrap().clone())
        }
    }

    struct MockRisk {
        accept: bool,
    }

    #[async_trait]
    impl RiskGate for MockRisk {
        async fn check_trade(&self, _intent: &TradeIntent) -> bool {
            self.accept
        }
    }

    #[derive(Default)]
    struct MockStore {
        records: Mutex<Vec<TradeAudit>>,
        updates: Mutex<Vec<(String, TradeUpdate)>>,
        fail_records: AtomicBool,
    }

    #[async_trait]
    impl TradeStore for MockStore {
        async fn record_trade(&self, audit: TradeAudit) -> Result<(), ApiError> {
            if self.fail_records.load(Ordering::SeqCst) {
                return Err(ApiError::Persistence("disk full".into()));
            }
            self.records.lock().unwrap().push(audit);
            Ok(())
        }

        async fn update_trade(&self, txid: &str, update: TradeUpdate) -> Result<(), ApiError> {
            self.updates
                .lock()
                .unwrap()
                .push((txid.to_string(), update));
            Ok(())
        }
    }

    fn intent() -> TradeIntent {
        TradeIntent {
            pair: "XXBTZUSD".to_string(),
            signal: Some(TradeSignal::Buy),
            strength: Some(dec!(0.8)),
            size: Some(dec!(0.5)),
            stop_loss: Some(dec!(49000)),
            take_profit: Some(dec!(52000)),
        }
    }

    fn executor(
        api: Arc<MockApi>,
        risk: Arc<MockRisk>,
        store: Arc<MockStore>,
        config: ExecutorConfig,
    ) -> TradeExecutor {
        TradeExecutor::new(config, api, risk, store, Arc::new(MarketCache::new()))
    }

    #[tokio::test]
    async fn test_missing_field_rejects_without_api_call() {
        let api = Arc::new(MockApi::new());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::new(MockStore::default()),
            ExecutorConfig::default(),
        );

        let mut bad = intent();
        bad.stop_loss = None;
        exec.execute_trade(bad).await;

        assert!(api.created.lock().unwrap().is_empty());
        assert!(exec.active_orders().is_empty());
        let stats = exec.stats();
        assert_eq!(stats.intents_rejected, 1);
        assert_eq!(stats.orders_placed, 0);
    }

    #[tokio::test]
    async fn test_risk_rejection_produces_no_order() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::default());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: false }),
            Arc::clone(&store),
            ExecutorConfig::default(),
        );

        exec.execute_trade(intent()).await;

        assert!(api.created.lock().unwrap().is_empty());
        assert!(exec.active_orders().is_empty());
        assert!(store.records.lock().unwrap().is_empty());
        assert_eq!(exec.stats().intents_rejected, 1);
    }

    #[tokio::test]
    async fn test_accepted_intent_places_primary_and_protective_orders() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::default());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::clone(&store),
            ExecutorConfig::default(),
        );

        exec.execute_trade(intent()).await;

        let created = api.created.lock().unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(created[0].order_type, "market");
        assert_eq!(created[0].side, "buy");
        assert_eq!(created[1].order_type, "stop-loss");
        assert_eq!(created[1].side, "sell");
        assert_eq!(created[1].price, Some(dec!(49000)));
        assert_eq!(created[2].order_type, "take-profit");
        assert_eq!(created[2].price, Some(dec!(52000)));
        drop(created);

        let active = exec.active_orders();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, OrderStatus::Open);
        assert_eq!(store.records.lock().unwrap().len(), 1);
        assert_eq!(exec.stats().orders_placed, 1);
    }

    #[tokio::test]
    async fn test_protective_failure_leaves_primary_open() {
        let api = Arc::new(MockApi::new());
        api.fail_protective.store(true, Ordering::SeqCst);
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::new(MockStore::default()),
            ExecutorConfig::default(),
        );

        exec.execute_trade(intent()).await;

        let active = exec.active_orders();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].status, OrderStatus::Open);
        assert_eq!(exec.stats().protective_failures, 2);
    }

    #[tokio::test]
    async fn test_primary_failure_registers_nothing() {
        let api = Arc::new(MockApi::new());
        api.reject_creates.store(true, Ordering::SeqCst);
        let store = Arc::new(MockStore::default());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::clone(&store),
            ExecutorConfig::default(),
        );

        exec.execute_trade(intent()).await;

        assert!(exec.active_orders().is_empty());
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_order_tracked() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::default());
        store.fail_records.store(true, Ordering::SeqCst);
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::clone(&store),
            ExecutorConfig::default(),
        );

        exec.execute_trade(intent()).await;

        assert_eq!(exec.active_orders().len(), 1);
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            monitor_interval: Duration::from_millis(10),
            monitor_backoff_initial: Duration::from_millis(5),
            monitor_backoff_max: Duration::from_millis(50),
            max_consecutive_failures: 3,
            ..ExecutorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_closes_filled_order_with_pnl() {
        let api = Arc::new(MockApi::new());
        let store = Arc::new(MockStore::default());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::clone(&store),
            fast_config(),
        );

        exec.execute_trade(intent()).await;
        let txid = exec.active_orders()[0].txid.clone();

        // Absent from open orders, present in closed: terminal Closed
        api.closed.lock().unwrap().insert(
            txid.clone(),
            ClosedOrderInfo {
                pair: "XXBTZUSD".to_string(),
                status: "closed".to_string(),
                price: dec!(51000),
                volume_executed: dec!(0.5),
                closed_at: Some(Utc::now()),
            },
        );

        exec.start_monitoring().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        exec.stop_monitoring().await;

        assert!(exec.active_orders().is_empty());
        assert_eq!(exec.stats().orders_closed, 1);
        assert_eq!(exec.stats().volume_traded, dec!(0.5));
        let updates = store.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, txid);
        assert_eq!(updates[0].1.status, OrderStatus::Closed);
        // entry price was 0 in the empty cache, so pnl = 51000 * 0.5
        assert_eq!(updates[0].1.pnl, Some(dec!(25500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_errors_vanished_order() {
        let api = Arc::new(MockApi::new());
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::new(MockStore::default()),
            fast_config(),
        );

        exec.execute_trade(intent()).await;
        assert_eq!(exec.active_orders().len(), 1);

        // Not in open orders and not in closed orders either
        exec.start_monitoring().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        exec.stop_monitoring().await;

        assert!(exec.active_orders().is_empty());
        assert_eq!(exec.stats().orders_errored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_permanently_then_restarts() {
        let api = Arc::new(MockApi::new());
        api.open_failures.store(u32::MAX, Ordering::SeqCst);
        let exec = executor(
            Arc::clone(&api),
            Arc::new(MockRisk { accept: true }),
            Arc::new(MockStore::default()),
            fast_config(),
        );

        exec.start_monitoring().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(exec.monitoring_stopped());
        assert!(exec.stats().monitoring_stopped);
        let polls_at_stop = api.polls.load(Ordering::SeqCst);
        assert_eq!(polls_at_stop, 3, "loop kept polling after permanent stop");

        // Explicit restart with a healthy API resumes polling
        api.open_failures.store(0, Ordering::SeqCst);
        exec.restart_monitoring().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        exec.stop_monitoring().await;

        assert!(!exec.monitoring_stopped());
        assert!(api.polls.load(Ordering::SeqCst) > polls_at_stop);
    }

    #[test]
    fn test_pnl_sign_follows_side() {
        let order = Order {
            txid: "TX1".to_string(),
            pair: "XXBTZUSD".to_string(),
            side: TradeSignal::Sell,
            size: dec!(1),
            entry_price: dec!(50000),
            stop_loss: dec!(51000),
            take_profit: dec!(48000),
            leverage: 1,
            status: OrderStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            pnl: None,
        };
        // short closed lower = profit
        assert_eq!(compute_pnl(&order, dec!(49000), dec!(1)), dec!(1000));
        assert_eq!(compute_pnl(&order, dec!(51000), dec!(1)), dec!(-1000));
    }
}
