//! Typed in-memory caches for decoded market data
//!
//! All mutation flows through [`MarketCache::apply`], called only by the
//! single frame-processor task while holding the cache write lock. Reads
//! clone whole records, so a reader can observe stale data but never a torn
//! record.

use crate::ws::events::{BookLevel, BookMessage, MarketEvent, TickerPayload, TradeRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Ring buffer cap for per-pair trade history
pub const TRADE_BUFFER_CAP: usize = 1000;

/// Whether a pair has received real data yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairStatus {
    Initializing,
    Active,
}

/// Last known ticker state for one pair. Replaced wholesale on every valid
/// message, never field-merged.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSnapshot {
    pub ask: Decimal,
    pub bid: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub vwap: Decimal,
    pub trade_count: u64,
    pub low: Decimal,
    pub high: Decimal,
    pub open: Decimal,
    pub last_update: DateTime<Utc>,
    pub status: PairStatus,
}

impl Default for TickerSnapshot {
    fn default() -> Self {
        Self {
            ask: Decimal::ZERO,
            bid: Decimal::ZERO,
            close: Decimal::ZERO,
            volume: Decimal::ZERO,
            vwap: Decimal::ZERO,
            trade_count: 0,
            low: Decimal::ZERO,
            high: Decimal::ZERO,
            open: Decimal::ZERO,
            last_update: DateTime::<Utc>::UNIX_EPOCH,
            status: PairStatus::Initializing,
        }
    }
}

impl From<TickerPayload> for TickerSnapshot {
    fn from(payload: TickerPayload) -> Self {
        Self {
            ask: payload.ask,
            bid: payload.bid,
            close: payload.close,
            volume: payload.volume,
            vwap: payload.vwap,
            trade_count: payload.trade_count,
            low: payload.low,
            high: payload.high,
            open: payload.open,
            last_update: Utc::now(),
            status: PairStatus::Active,
        }
    }
}

impl TickerSnapshot {
    /// True once ask, bid and close are all non-zero; used by the session's
    /// readiness wait.
    pub fn has_real_prices(&self) -> bool {
        self.ask > Decimal::ZERO && self.bid > Decimal::ZERO && self.close > Decimal::ZERO
    }
}

/// One price level as cached
#[derive(Debug, Clone, PartialEq)]
pub struct LevelEntry {
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: Decimal,
}

impl From<&BookLevel> for LevelEntry {
    fn from(level: &BookLevel) -> Self {
        Self {
            price: level.price,
            volume: level.volume,
            timestamp: level.timestamp,
        }
    }
}

/// One side of a book, keyed by the exchange's exact price string
pub type OrderBookSide = BTreeMap<String, LevelEntry>;

/// Per-pair order book. Updates are only applied once a snapshot has been
/// seen for the pair.
#[derive(Debug, Clone, Default)]
pub struct PairOrderBook {
    pub asks: OrderBookSide,
    pub bids: OrderBookSide,
    snapshot_seen: bool,
}

impl PairOrderBook {
    /// Apply a snapshot: both sides are replaced outright and any state from
    /// intervening updates is discarded.
    pub fn apply_snapshot(&mut self, asks: &[BookLevel], bids: &[BookLevel]) {
        self.asks = Self::side_from(asks);
        self.bids = Self::side_from(bids);
        self.snapshot_seen = true;
    }

    /// Apply an incremental update: upsert each level, delete on zero volume.
    /// Returns false (and changes nothing) when no snapshot has been seen.
    pub fn apply_update(&mut self, asks: &[BookLevel], bids: &[BookLevel]) -> bool {
        if !self.snapshot_seen {
            return false;
        }
        Self::upsert(&mut self.asks, asks);
        Self::upsert(&mut self.bids, bids);
        true
    }

    pub fn snapshot_seen(&self) -> bool {
        self.snapshot_seen
    }

    fn side_from(levels: &[BookLevel]) -> OrderBookSide {
        levels
            .iter()
            .map(|level| (level.price_key.clone(), LevelEntry::from(level)))
            .collect()
    }

    fn upsert(side: &mut OrderBookSide, levels: &[BookLevel]) {
        for level in levels {
            if level.volume.is_zero() {
                side.remove(&level.price_key);
            } else {
                side.insert(level.price_key.clone(), LevelEntry::from(level));
            }
        }
    }
}

/// All typed caches, keyed by pair
pub struct MarketCache {
    /// Serializes mutation; reads go straight to the maps
    write_lock: Mutex<()>,
    tickers: DashMap<String, TickerSnapshot>,
    books: DashMap<String, PairOrderBook>,
    trades: DashMap<String, VecDeque<TradeRecord>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self {
            write_lock: Mutex::new(()),
            tickers: DashMap::new(),
            books: DashMap::new(),
            trades: DashMap::new(),
        }
    }

    /// Apply one decoded event under the write lock.
    pub async fn apply(&self, event: &MarketEvent) {
        let _guard = self.write_lock.lock().await;
        match event {
            MarketEvent::Ticker { pair, payload } => {
                self.tickers
                    .insert(pair.clone(), TickerSnapshot::from(payload.clone()));
            }
            MarketEvent::Book { pair, message, .. } => match message {
                BookMessage::Snapshot { asks, bids } => {
                    let mut book = self.books.entry(pair.clone()).or_default();
                    book.apply_snapshot(asks, bids);
                    debug!(pair = %pair, asks = asks.len(), bids = bids.len(), "book snapshot applied");
                }
                BookMessage::Update { asks, bids } => {
                    let mut book = self.books.entry(pair.clone()).or_default();
                    if !book.apply_update(asks, bids) {
                        warn!(pair = %pair, "book update before snapshot, ignored");
                    }
                }
            },
            MarketEvent::Trades { pair, trades } => {
                let mut buffer = self.trades.entry(pair.clone()).or_default();
                for trade in trades {
                    if buffer.len() == TRADE_BUFFER_CAP {
                        buffer.pop_front();
                    }
                    buffer.push_back(trade.clone());
                }
            }
            MarketEvent::Ohlc { .. } => {
                // Candles go to subscribers only; nothing cached here.
            }
        }
    }

    /// Ticker for a pair, or a zeroed `Initializing` snapshot when unknown.
    pub fn ticker_or_default(&self, pair: &str) -> TickerSnapshot {
        self.tickers
            .get(pair)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// True when any cached pair has real (non-zero) prices.
    pub fn any_ticker_ready(&self) -> bool {
        self.tickers.iter().any(|entry| entry.has_real_prices())
    }

    pub fn book(&self, pair: &str) -> Option<PairOrderBook> {
        self.books.get(pair).map(|entry| entry.clone())
    }

    pub fn recent_trades(&self, pair: &str) -> Vec<TradeRecord> {
        self.trades
            .get(pair)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tracked_pairs(&self) -> Vec<String> {
        self.tickers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}
